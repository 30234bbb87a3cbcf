#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::core::worktree::{Worktree, parse_worktree_porcelain};
use crate::error::GwError;

/// Version-control operations the rest of the crate depends on.
///
/// `Git` shells out to the `git` binary; tests substitute a recording fake.
pub trait Vcs: Send + Sync {
    fn repo_root(&self) -> &Path;

    fn list_worktrees(&self) -> Result<Vec<Worktree>, GwError>;
    fn primary_worktree(&self) -> Result<PathBuf, GwError>;
    /// `None` when `dir` has a detached HEAD.
    fn current_branch(&self, dir: &Path) -> Result<Option<String>, GwError>;
    fn branch_exists(&self, branch: &str) -> Result<bool, GwError>;

    fn add_worktree(
        &self,
        path: &Path,
        branch: &str,
        create_branch: bool,
        base: Option<&str>,
    ) -> Result<(), GwError>;
    fn move_worktree(&self, from: &Path, to: &Path) -> Result<(), GwError>;
    fn remove_worktree(&self, path: &Path, force: bool) -> Result<(), GwError>;
    fn prune_worktrees(&self) -> Result<String, GwError>;

    fn rename_branch(&self, dir: &Path, from: &str, to: &str) -> Result<(), GwError>;
    fn delete_branch(&self, branch: &str, force: bool) -> Result<(), GwError>;

    fn remote_url(&self, remote: &str) -> Option<String>;
    fn remote_default_branch(&self) -> Option<String>;
    fn has_changes(&self, dir: &Path) -> Result<bool, GwError>;
    fn ref_exists(&self, dir: &Path, rev: &str) -> bool;
    fn commits_ahead(&self, dir: &Path, base: &str) -> Result<u32, GwError>;
    fn ignored_files(&self, root: &Path) -> Result<Vec<String>, GwError>;

    fn config_get(&self, key: &str) -> Result<Option<String>, GwError>;
    fn config_get_all(&self, dir: &Path, key: &str) -> Result<Vec<String>, GwError>;
    fn config_set(&self, key: &str, value: &str) -> Result<(), GwError>;
    fn config_list(&self, pattern: &str) -> Result<Vec<(String, String)>, GwError>;
}

#[derive(Debug, Clone)]
pub struct Git {
    repo_root: PathBuf,
}

impl Git {
    pub fn from_dir(dir: &Path) -> Result<Self, GwError> {
        let repo_root = find_repo_root(dir).ok_or(GwError::NotInGitRepo)?;
        Ok(Self { repo_root })
    }

    #[must_use]
    pub fn new(repo_root: PathBuf) -> Self {
        Self { repo_root }
    }

    pub fn run(&self, args: &[&str]) -> Result<String, GwError> {
        self.run_in_dir(&self.repo_root, args)
    }

    pub fn run_in_dir(&self, dir: &Path, args: &[&str]) -> Result<String, GwError> {
        let out = self.run_raw(dir, args)?;
        if out.status.success() {
            Ok(String::from_utf8_lossy(&out.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&out.stderr);
            Err(GwError::Git {
                args: args.join(" "),
                stderr: stderr.trim().to_owned(),
            })
        }
    }

    pub fn run_raw(&self, dir: &Path, args: &[&str]) -> Result<Output, GwError> {
        log::debug!("git {} (in {})", args.join(" "), dir.display());
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => GwError::GitNotFound,
                _ => GwError::Other(format!("failed to run git: {e}")),
            })
    }

    /// Like `run_in_dir`, but a plain exit status of 1 (git's "not found" for
    /// config lookups) yields `None` instead of an error.
    fn run_optional(&self, dir: &Path, args: &[&str]) -> Result<Option<String>, GwError> {
        let out = self.run_raw(dir, args)?;
        if out.status.success() {
            return Ok(Some(String::from_utf8_lossy(&out.stdout).to_string()));
        }
        if out.status.code() == Some(1) {
            return Ok(None);
        }
        Err(GwError::Git {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_owned(),
        })
    }
}

impl Vcs for Git {
    fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn list_worktrees(&self) -> Result<Vec<Worktree>, GwError> {
        let out = self.run(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_porcelain(&out))
    }

    fn primary_worktree(&self) -> Result<PathBuf, GwError> {
        let out = self.run(&["rev-parse", "--path-format=absolute", "--git-common-dir"])?;
        let common = PathBuf::from(out.trim());
        let primary = common
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| GwError::Other("primary worktree not found".to_owned()))?;
        if primary.is_dir() {
            Ok(primary)
        } else {
            Err(GwError::Other("primary worktree not found".to_owned()))
        }
    }

    fn current_branch(&self, dir: &Path) -> Result<Option<String>, GwError> {
        let out = self.run_in_dir(dir, &["branch", "--show-current"])?;
        let branch = out.trim();
        if branch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(branch.to_owned()))
        }
    }

    fn branch_exists(&self, branch: &str) -> Result<bool, GwError> {
        let refname = format!("refs/heads/{branch}");
        let out = self.run_raw(&self.repo_root, &["show-ref", "--verify", "--quiet", &refname])?;
        Ok(out.status.success())
    }

    fn add_worktree(
        &self,
        path: &Path,
        branch: &str,
        create_branch: bool,
        base: Option<&str>,
    ) -> Result<(), GwError> {
        let path = path.to_string_lossy();
        let path: &str = path.as_ref();
        let mut args = vec!["worktree", "add"];
        if create_branch {
            args.extend(["-b", branch, path]);
            if let Some(base) = base {
                args.push(base);
            }
        } else {
            args.extend([path, branch]);
        }
        let _ = self.run(&args)?;
        Ok(())
    }

    fn move_worktree(&self, from: &Path, to: &Path) -> Result<(), GwError> {
        let from = from.to_string_lossy();
        let to = to.to_string_lossy();
        let _ = self.run(&["worktree", "move", &from, &to])?;
        Ok(())
    }

    fn remove_worktree(&self, path: &Path, force: bool) -> Result<(), GwError> {
        let path = path.to_string_lossy();
        if force {
            let _ = self.run(&["worktree", "remove", "--force", &path])?;
        } else {
            let _ = self.run(&["worktree", "remove", &path])?;
        }
        Ok(())
    }

    fn prune_worktrees(&self) -> Result<String, GwError> {
        self.run(&["worktree", "prune", "--verbose"])
    }

    fn rename_branch(&self, dir: &Path, from: &str, to: &str) -> Result<(), GwError> {
        let _ = self.run_in_dir(dir, &["branch", "-m", from, to])?;
        Ok(())
    }

    fn delete_branch(&self, branch: &str, force: bool) -> Result<(), GwError> {
        let flag = if force { "-D" } else { "-d" };
        let _ = self.run(&["branch", flag, branch])?;
        Ok(())
    }

    fn remote_url(&self, remote: &str) -> Option<String> {
        self.run(&["remote", "get-url", remote])
            .ok()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
    }

    fn remote_default_branch(&self) -> Option<String> {
        self.run(&[
            "symbolic-ref",
            "--quiet",
            "--short",
            "refs/remotes/origin/HEAD",
        ])
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
    }

    fn has_changes(&self, dir: &Path) -> Result<bool, GwError> {
        let out = self.run_in_dir(dir, &["status", "--porcelain"])?;
        Ok(!out.trim().is_empty())
    }

    fn ref_exists(&self, dir: &Path, rev: &str) -> bool {
        self.run_raw(dir, &["rev-parse", "--verify", "--quiet", rev])
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn commits_ahead(&self, dir: &Path, base: &str) -> Result<u32, GwError> {
        let range = format!("{base}..HEAD");
        let out = self.run_in_dir(dir, &["rev-list", "--count", &range])?;
        out.trim()
            .parse()
            .map_err(|e| GwError::Other(format!("invalid rev-list count: {e}")))
    }

    fn ignored_files(&self, root: &Path) -> Result<Vec<String>, GwError> {
        let out = self.run_in_dir(
            root,
            &["ls-files", "--others", "--ignored", "--exclude-standard"],
        )?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }

    fn config_get(&self, key: &str) -> Result<Option<String>, GwError> {
        Ok(self
            .run_optional(&self.repo_root, &["config", "--get", key])?
            .map(|s| s.trim().to_owned()))
    }

    fn config_get_all(&self, dir: &Path, key: &str) -> Result<Vec<String>, GwError> {
        let out = self.run_optional(dir, &["config", "--get-all", key])?;
        Ok(out
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }

    fn config_set(&self, key: &str, value: &str) -> Result<(), GwError> {
        let _ = self.run(&["config", key, value])?;
        Ok(())
    }

    fn config_list(&self, pattern: &str) -> Result<Vec<(String, String)>, GwError> {
        let out = self
            .run_optional(&self.repo_root, &["config", "--get-regexp", pattern])?
            .unwrap_or_default();
        Ok(out
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    return None;
                }
                let (key, value) = line.split_once(' ').unwrap_or((line, ""));
                Some((key.to_owned(), value.to_owned()))
            })
            .collect())
    }
}

fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let mut cur = Some(start);
    while let Some(dir) = cur {
        let candidate = dir.join(".git");
        if candidate.is_dir() || candidate.is_file() {
            return Some(dir.to_path_buf());
        }
        cur = dir.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_repo_root_from_nested_dir() {
        let td = tempfile::tempdir().expect("tempdir");
        let root = td.path().join("repo");
        let nested = root.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();

        assert_eq!(find_repo_root(&nested), Some(root.clone()));
        assert_eq!(Git::from_dir(&nested).unwrap().repo_root(), root.as_path());
    }

    #[test]
    fn linked_worktree_gitfile_counts_as_root() {
        let td = tempfile::tempdir().expect("tempdir");
        let wt = td.path().join("wt");
        std::fs::create_dir_all(wt.join("src")).unwrap();
        std::fs::write(wt.join(".git"), "gitdir: /elsewhere\n").unwrap();

        assert_eq!(find_repo_root(&wt.join("src")), Some(wt));
    }
}
