#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::git::Vcs;
use crate::core::naming::PathPlanner;
use crate::error::GwError;

/// One `git worktree list` record. `branch` is `None` for a detached HEAD.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Worktree {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head: String,
}

impl Worktree {
    #[must_use]
    pub fn branch_label(&self) -> &str {
        self.branch.as_deref().unwrap_or("(detached)")
    }
}

pub struct WorktreeManager {
    vcs: Arc<dyn Vcs>,
    planner: PathPlanner,
}

impl WorktreeManager {
    #[must_use]
    pub fn new(vcs: Arc<dyn Vcs>, planner: PathPlanner) -> Self {
        Self { vcs, planner }
    }

    #[must_use]
    pub fn planner(&self) -> &PathPlanner {
        &self.planner
    }

    pub fn list(&self) -> Result<Vec<Worktree>, GwError> {
        self.vcs.list_worktrees()
    }

    pub fn find_by_branch(&self, branch: &str) -> Result<Worktree, GwError> {
        self.list()?
            .into_iter()
            .find(|wt| wt.branch.as_deref() == Some(branch))
            .ok_or_else(|| GwError::WorktreeNotFound(branch.to_owned()))
    }

    /// The worktree containing `dir`, preferring the deepest match so nested
    /// worktree layouts resolve correctly.
    pub fn containing(&self, dir: &Path) -> Result<Option<Worktree>, GwError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|wt| dir.starts_with(&wt.path))
            .max_by_key(|wt| wt.path.as_os_str().len()))
    }

    /// Creates a worktree at the planned location. With `base = Some(..)` a new
    /// branch is created from that ref; otherwise `branch` must already exist.
    pub fn create(&self, branch: &str, new_branch_base: Option<&str>) -> Result<PathBuf, GwError> {
        let path = self.planner.compute_path(branch)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GwError::io(parent, e))?;
        }
        match new_branch_base {
            Some(base) => self.vcs.add_worktree(&path, branch, true, Some(base))?,
            None => self.vcs.add_worktree(&path, branch, false, None)?,
        }
        log::debug!("created worktree for {branch} at {}", path.display());
        Ok(path)
    }

    /// Removes the worktree and then its branch. Branch deletion failure is
    /// reported as a warning only; the worktree is already gone at that point.
    pub fn remove_with_branch(&self, wt: &Worktree, force: bool) -> Result<(), GwError> {
        self.vcs.remove_worktree(&wt.path, force)?;
        if let Some(branch) = wt.branch.as_deref() {
            match self.vcs.delete_branch(branch, true) {
                Ok(()) => eprintln!("Deleted branch: {branch}"),
                Err(e) => {
                    log::warn!("failed to delete branch {branch}: {e}");
                    eprintln!("Warning: failed to delete branch: {branch}");
                }
            }
        }
        Ok(())
    }

    pub fn prune(&self) -> Result<String, GwError> {
        self.vcs.prune_worktrees()
    }
}

pub(crate) fn parse_worktree_porcelain(out: &str) -> Vec<Worktree> {
    let mut entries: Vec<Worktree> = Vec::new();

    let mut cur_path: Option<PathBuf> = None;
    let mut cur_branch: Option<String> = None;
    let mut cur_head = String::new();

    for line in out.lines() {
        let line = line.trim_end();
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(p) = cur_path.take() {
                entries.push(Worktree {
                    path: p,
                    branch: cur_branch.take(),
                    head: std::mem::take(&mut cur_head),
                });
            }
            cur_path = Some(PathBuf::from(path));
        } else if let Some(branch) = line.strip_prefix("branch ") {
            cur_branch = Some(branch.trim().trim_start_matches("refs/heads/").to_owned());
        } else if let Some(head) = line.strip_prefix("HEAD ") {
            head.trim().clone_into(&mut cur_head);
        }
    }
    if let Some(p) = cur_path.take() {
        entries.push(Worktree {
            path: p,
            branch: cur_branch,
            head: cur_head,
        });
    }

    entries
}
