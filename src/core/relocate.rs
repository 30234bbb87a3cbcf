#![forbid(unsafe_code)]

use std::os::unix::fs::MetadataExt as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::git::Vcs;
use crate::core::naming::PathPlanner;
use crate::error::GwError;

/// Everything a move needs, computed before anything is mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationPlan {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
    pub old_branch: String,
    pub new_branch: String,
    /// Flattening mapped both branches onto the same directory.
    pub same_path: bool,
    /// Caller's cwd relative to `old_path`, when it was inside it.
    pub caller_subpath: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    /// Where the worktree lives after the move.
    pub worktree_path: PathBuf,
    /// Where the caller should `cd`: the equivalent subdirectory if it still
    /// exists, otherwise the worktree root.
    pub print_path: PathBuf,
    pub moved: bool,
}

pub struct Relocator {
    vcs: Arc<dyn Vcs>,
    planner: PathPlanner,
}

impl Relocator {
    #[must_use]
    pub fn new(vcs: Arc<dyn Vcs>, planner: PathPlanner) -> Self {
        Self { vcs, planner }
    }

    pub fn relocate(
        &self,
        old_branch: &str,
        new_branch: &str,
        caller_cwd: Option<&Path>,
    ) -> Result<MoveOutcome, GwError> {
        let plan = self.plan(old_branch, new_branch, caller_cwd)?;
        self.execute(&plan)
    }

    pub fn plan(
        &self,
        old_branch: &str,
        new_branch: &str,
        caller_cwd: Option<&Path>,
    ) -> Result<RelocationPlan, GwError> {
        let old_branch = old_branch.trim();
        let new_branch = new_branch.trim();
        if old_branch.is_empty() || new_branch.is_empty() {
            return Err(GwError::InvalidInput("both branch names required".to_owned()));
        }
        if old_branch == new_branch {
            return Err(GwError::InvalidInput("branch names must differ".to_owned()));
        }

        let old_path = self
            .vcs
            .list_worktrees()?
            .into_iter()
            .find(|wt| wt.branch.as_deref() == Some(old_branch))
            .map(|wt| wt.path)
            .ok_or_else(|| GwError::WorktreeNotFound(old_branch.to_owned()))?;

        if let Ok(primary) = self.vcs.primary_worktree()
            && same_location(&primary, &old_path)
        {
            return Err(GwError::PrimaryProtected(old_path));
        }

        match self.vcs.current_branch(&old_path)? {
            None => return Err(GwError::DetachedProtected(old_path)),
            Some(actual) if actual == "HEAD" => return Err(GwError::DetachedProtected(old_path)),
            Some(actual) if actual != old_branch => {
                return Err(GwError::BranchMismatch {
                    expected: old_branch.to_owned(),
                    actual,
                });
            }
            Some(_) => {}
        }

        let new_path = self.planner.compute_path(new_branch)?;
        let same_path = same_location(&new_path, &old_path);
        if !same_path && new_path.symlink_metadata().is_ok() {
            return Err(GwError::DestinationExists(new_path));
        }

        let caller_subpath = caller_cwd.and_then(|cwd| relative_within(&old_path, cwd));

        Ok(RelocationPlan {
            new_path: if same_path { old_path.clone() } else { new_path },
            old_path,
            old_branch: old_branch.to_owned(),
            new_branch: new_branch.to_owned(),
            same_path,
            caller_subpath,
        })
    }

    /// Rename first, then move. A failed move triggers `compensate_rename` and
    /// the move error is returned.
    pub fn execute(&self, plan: &RelocationPlan) -> Result<MoveOutcome, GwError> {
        if !plan.same_path
            && let Some(parent) = plan.new_path.parent()
        {
            std::fs::create_dir_all(parent).map_err(|e| GwError::io(parent, e))?;
        }

        self.vcs
            .rename_branch(&plan.old_path, &plan.old_branch, &plan.new_branch)?;
        eprintln!("Renamed branch: {} -> {}", plan.old_branch, plan.new_branch);

        if !plan.same_path {
            if let Err(e) = self.vcs.move_worktree(&plan.old_path, &plan.new_path) {
                self.compensate_rename(plan);
                return Err(e);
            }
            eprintln!(
                "Moved worktree: {} -> {}",
                plan.old_path.display(),
                plan.new_path.display()
            );
        }

        Ok(MoveOutcome {
            print_path: navigation_target(&plan.new_path, plan.caller_subpath.as_deref()),
            worktree_path: plan.new_path.clone(),
            moved: !plan.same_path,
        })
    }

    /// Best-effort revert of the branch rename. A failure here is only logged;
    /// the caller already has the primary error.
    pub fn compensate_rename(&self, plan: &RelocationPlan) -> bool {
        match self
            .vcs
            .rename_branch(&plan.old_path, &plan.new_branch, &plan.old_branch)
        {
            Ok(()) => {
                eprintln!("Reverted branch rename because worktree move failed");
                true
            }
            Err(e) => {
                log::warn!(
                    "could not revert branch rename {} -> {}: {e}",
                    plan.new_branch,
                    plan.old_branch
                );
                false
            }
        }
    }
}

/// Same physical directory: equal paths, equal device/inode, or equal
/// resolved paths. Missing paths only compare equal textually.
#[must_use]
pub fn same_location(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    if let (Ok(ma), Ok(mb)) = (std::fs::metadata(a), std::fs::metadata(b))
        && ma.dev() == mb.dev()
        && ma.ino() == mb.ino()
    {
        return true;
    }
    matches!(
        (std::fs::canonicalize(a), std::fs::canonicalize(b)),
        (Ok(ra), Ok(rb)) if ra == rb
    )
}

/// `cwd` relative to `root` when it lies strictly inside it.
#[must_use]
pub fn relative_within(root: &Path, cwd: &Path) -> Option<PathBuf> {
    let rel = cwd.strip_prefix(root).ok()?;
    if rel.as_os_str().is_empty() {
        None
    } else {
        Some(rel.to_path_buf())
    }
}

/// `root/rel` if that directory exists, otherwise `root`.
#[must_use]
pub fn navigation_target(root: &Path, rel: Option<&Path>) -> PathBuf {
    if let Some(rel) = rel {
        let candidate = root.join(rel);
        if candidate.is_dir() {
            return candidate;
        }
    }
    root.to_path_buf()
}
