#![forbid(unsafe_code)]

//! In-memory `Vcs` used by unit tests. Every mutating call is recorded.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::core::git::Vcs;
use crate::core::worktree::Worktree;
use crate::error::GwError;

#[derive(Default)]
struct FakeState {
    worktrees: Vec<Worktree>,
    remotes: HashMap<String, String>,
    default_branch: Option<String>,
    refs: HashSet<String>,
    dirty: HashSet<PathBuf>,
    ahead: HashMap<PathBuf, u32>,
    fail_ahead: HashSet<PathBuf>,
    ignored: Vec<String>,
    config: BTreeMap<String, Vec<String>>,
    checked_out: HashMap<PathBuf, Option<String>>,
    fail_move: bool,
    fail_rename_to: HashSet<String>,
    calls: Vec<String>,
}

pub(crate) struct FakeVcs {
    root: PathBuf,
    state: Mutex<FakeState>,
}

impl FakeVcs {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(FakeState::default()),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut st = self.state.lock().unwrap();
        f(&mut st)
    }

    pub(crate) fn add(&self, path: impl Into<PathBuf>, branch: Option<&str>) {
        let path = path.into();
        self.with(|st| {
            st.worktrees.push(Worktree {
                path,
                branch: branch.map(str::to_owned),
                head: "0000000".to_owned(),
            });
        });
    }

    pub(crate) fn set_remote(&self, name: &str, url: &str) {
        self.with(|st| st.remotes.insert(name.to_owned(), url.to_owned()));
    }

    pub(crate) fn set_default_branch(&self, rev: &str) {
        self.with(|st| st.default_branch = Some(rev.to_owned()));
    }

    pub(crate) fn add_ref(&self, rev: &str) {
        self.with(|st| st.refs.insert(rev.to_owned()));
    }

    pub(crate) fn set_dirty(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.with(|st| st.dirty.insert(path));
    }

    pub(crate) fn set_ahead(&self, path: impl Into<PathBuf>, n: u32) {
        let path = path.into();
        self.with(|st| st.ahead.insert(path, n));
    }

    pub(crate) fn fail_ahead(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.with(|st| st.fail_ahead.insert(path));
    }

    pub(crate) fn set_ignored(&self, files: &[&str]) {
        self.with(|st| st.ignored = files.iter().map(|s| (*s).to_owned()).collect());
    }

    pub(crate) fn set_config(&self, key: &str, values: &[&str]) {
        self.with(|st| {
            st.config.insert(
                key.to_owned(),
                values.iter().map(|s| (*s).to_owned()).collect(),
            )
        });
    }

    /// Overrides what `current_branch` reports for `path`, independent of the
    /// listing.
    pub(crate) fn set_checked_out(&self, path: impl Into<PathBuf>, branch: Option<&str>) {
        let path = path.into();
        self.with(|st| st.checked_out.insert(path, branch.map(str::to_owned)));
    }

    pub(crate) fn fail_move(&self) {
        self.with(|st| st.fail_move = true);
    }

    pub(crate) fn fail_rename_to(&self, branch: &str) {
        self.with(|st| st.fail_rename_to.insert(branch.to_owned()));
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.with(|st| st.calls.clone())
    }

    pub(crate) fn branch_at(&self, path: &Path) -> Option<String> {
        self.with(|st| {
            st.worktrees
                .iter()
                .find(|w| w.path == path)
                .and_then(|w| w.branch.clone())
        })
    }

    fn git_err(args: &str, stderr: &str) -> GwError {
        GwError::Git {
            args: args.to_owned(),
            stderr: stderr.to_owned(),
        }
    }
}

impl Vcs for FakeVcs {
    fn repo_root(&self) -> &Path {
        &self.root
    }

    fn list_worktrees(&self) -> Result<Vec<Worktree>, GwError> {
        Ok(self.with(|st| st.worktrees.clone()))
    }

    fn primary_worktree(&self) -> Result<PathBuf, GwError> {
        Ok(self.with(|st| {
            st.worktrees
                .first()
                .map_or_else(|| self.root.clone(), |w| w.path.clone())
        }))
    }

    fn current_branch(&self, dir: &Path) -> Result<Option<String>, GwError> {
        self.with(|st| {
            if let Some(branch) = st.checked_out.get(dir) {
                return Ok(branch.clone());
            }
            st.worktrees
                .iter()
                .find(|w| w.path == dir)
                .map(|w| w.branch.clone())
                .ok_or_else(|| Self::git_err("branch --show-current", "not a git repository"))
        })
    }

    fn branch_exists(&self, branch: &str) -> Result<bool, GwError> {
        Ok(self.with(|st| {
            st.worktrees
                .iter()
                .any(|w| w.branch.as_deref() == Some(branch))
        }))
    }

    fn add_worktree(
        &self,
        path: &Path,
        branch: &str,
        create_branch: bool,
        base: Option<&str>,
    ) -> Result<(), GwError> {
        self.with(|st| {
            st.calls.push(format!(
                "worktree add {} {branch} create={create_branch} base={}",
                path.display(),
                base.unwrap_or("-")
            ));
            st.worktrees.push(Worktree {
                path: path.to_path_buf(),
                branch: Some(branch.to_owned()),
                head: "0000000".to_owned(),
            });
        });
        Ok(())
    }

    fn move_worktree(&self, from: &Path, to: &Path) -> Result<(), GwError> {
        self.with(|st| {
            st.calls
                .push(format!("worktree move {} {}", from.display(), to.display()));
            if st.fail_move {
                return Err(Self::git_err("worktree move", "destination exists"));
            }
            for w in &mut st.worktrees {
                if w.path == from {
                    w.path = to.to_path_buf();
                }
            }
            Ok(())
        })
    }

    fn remove_worktree(&self, path: &Path, force: bool) -> Result<(), GwError> {
        self.with(|st| {
            st.calls
                .push(format!("worktree remove {} force={force}", path.display()));
            st.worktrees.retain(|w| w.path != path);
        });
        Ok(())
    }

    fn prune_worktrees(&self) -> Result<String, GwError> {
        self.with(|st| st.calls.push("worktree prune".to_owned()));
        Ok(String::new())
    }

    fn rename_branch(&self, _dir: &Path, from: &str, to: &str) -> Result<(), GwError> {
        self.with(|st| {
            st.calls.push(format!("branch -m {from} {to}"));
            if st.fail_rename_to.contains(to) {
                return Err(Self::git_err("branch -m", "cannot rename"));
            }
            for w in &mut st.worktrees {
                if w.branch.as_deref() == Some(from) {
                    w.branch = Some(to.to_owned());
                }
            }
            Ok(())
        })
    }

    fn delete_branch(&self, branch: &str, force: bool) -> Result<(), GwError> {
        self.with(|st| st.calls.push(format!("branch delete {branch} force={force}")));
        Ok(())
    }

    fn remote_url(&self, remote: &str) -> Option<String> {
        self.with(|st| st.remotes.get(remote).cloned())
    }

    fn remote_default_branch(&self) -> Option<String> {
        self.with(|st| st.default_branch.clone())
    }

    fn has_changes(&self, dir: &Path) -> Result<bool, GwError> {
        Ok(self.with(|st| st.dirty.contains(dir)))
    }

    fn ref_exists(&self, _dir: &Path, rev: &str) -> bool {
        self.with(|st| st.refs.contains(rev))
    }

    fn commits_ahead(&self, dir: &Path, base: &str) -> Result<u32, GwError> {
        self.with(|st| {
            st.calls
                .push(format!("rev-list {base}..HEAD in {}", dir.display()));
            if st.fail_ahead.contains(dir) {
                return Err(Self::git_err("rev-list", "bad revision"));
            }
            Ok(st.ahead.get(dir).copied().unwrap_or(0))
        })
    }

    fn ignored_files(&self, _root: &Path) -> Result<Vec<String>, GwError> {
        Ok(self.with(|st| st.ignored.clone()))
    }

    fn config_get(&self, key: &str) -> Result<Option<String>, GwError> {
        Ok(self.with(|st| st.config.get(key).and_then(|v| v.last().cloned())))
    }

    fn config_get_all(&self, _dir: &Path, key: &str) -> Result<Vec<String>, GwError> {
        Ok(self.with(|st| st.config.get(key).cloned().unwrap_or_default()))
    }

    fn config_set(&self, key: &str, value: &str) -> Result<(), GwError> {
        self.with(|st| {
            st.calls.push(format!("config {key} {value}"));
            st.config.insert(key.to_owned(), vec![value.to_owned()]);
        });
        Ok(())
    }

    fn config_list(&self, pattern: &str) -> Result<Vec<(String, String)>, GwError> {
        let prefix = pattern.trim_start_matches('^').trim_end_matches("\\.");
        Ok(self.with(|st| {
            st.config
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .flat_map(|(k, vs)| vs.iter().map(move |v| (k.clone(), v.clone())))
                .collect()
        }))
    }
}
