#![forbid(unsafe_code)]

use std::path::{Component, Path, PathBuf};

use regex::Regex;

use crate::core::git::Vcs;
use crate::error::GwError;

/// Namespace segment for repositories without a parseable `origin` remote.
pub const LOCAL_NAMESPACE: &str = "local";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoId {
    pub host: String,
    pub owner: String,
    pub repo: String,
}

#[must_use]
pub fn parse_origin_url(url: &str) -> Option<RepoId> {
    // Accept:
    // - https://host/owner/repo(.git)
    // - ssh://git@host/owner/repo(.git)
    // - git://host/owner/repo(.git)
    // - git@host:owner/repo(.git)
    let url = url.trim();

    if let Some(rest) = url.strip_prefix("git@") {
        let (host, path) = rest.split_once(':')?;
        return parse_host_path(host, path);
    }

    let re = Regex::new(r"^(?:https?|ssh|git)://(?:[^@/]+@)?([^/]+)/(.+)$").ok()?;
    let caps = re.captures(url)?;
    let host = caps.get(1)?.as_str();
    let path = caps.get(2)?.as_str();
    parse_host_path(host, path)
}

fn parse_host_path(host: &str, path: &str) -> Option<RepoId> {
    let mut parts = path.trim_matches('/').split('/');
    let owner = parts.next().filter(|s| !s.is_empty())?.to_owned();
    let repo_raw = parts.next().filter(|s| !s.is_empty())?;
    let repo = repo_raw.strip_suffix(".git").unwrap_or(repo_raw).to_owned();
    if host.is_empty() || repo.is_empty() {
        return None;
    }
    Some(RepoId {
        host: host.to_owned(),
        owner,
        repo,
    })
}

/// Leaf directory name for a branch: every path separator becomes `-`, so
/// `feature/x` and `feature-x` share a leaf. Idempotent.
#[must_use]
pub fn flatten_branch(branch: &str) -> String {
    branch.replace(['/', '\\'], "-")
}

/// Computes where a branch's worktree lives. Pure once constructed: no
/// filesystem access, no counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPlanner {
    base: PathBuf,
}

impl PathPlanner {
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// `<base_dir>/<host>/<owner>/<repo>` when `origin` parses, otherwise
    /// `<base_dir>/local/<primary worktree relative to home>`.
    pub fn for_repo(vcs: &dyn Vcs, base_dir: &Path, home: &Path) -> Result<Self, GwError> {
        if let Some(url) = vcs.remote_url("origin")
            && let Some(id) = parse_origin_url(&url)
        {
            return Ok(Self::new(
                base_dir.join(&id.host).join(&id.owner).join(&id.repo),
            ));
        }

        let root = vcs.primary_worktree()?;
        Ok(Self::new(base_dir.join(LOCAL_NAMESPACE).join(local_relative(&root, home))))
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn compute_path(&self, branch: &str) -> Result<PathBuf, GwError> {
        let branch = branch.trim();
        if branch.is_empty() {
            return Err(GwError::InvalidBranchName(branch.to_owned()));
        }
        let leaf = flatten_branch(branch);
        if leaf.trim_matches('-').is_empty() || leaf == "." || leaf == ".." {
            return Err(GwError::InvalidBranchName(branch.to_owned()));
        }

        let path = self.base.join(&leaf);
        if path.as_os_str().is_empty() || path.parent().is_none() {
            return Err(GwError::InvalidBranchName(branch.to_owned()));
        }
        Ok(path)
    }
}

fn local_relative(root: &Path, home: &Path) -> PathBuf {
    let rel = root.strip_prefix(home).unwrap_or(root);
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::FakeVcs;

    #[test]
    fn parses_origin_urls() {
        let id = parse_origin_url("https://github.com/sh0o0/gw.git").unwrap();
        assert_eq!(
            id,
            RepoId {
                host: "github.com".to_owned(),
                owner: "sh0o0".to_owned(),
                repo: "gw".to_owned()
            }
        );

        let id = parse_origin_url("ssh://git@github.com/sh0o0/gw.git").unwrap();
        assert_eq!(id.owner, "sh0o0");

        let id = parse_origin_url("git@gitlab.example.com:team/tool.git").unwrap();
        assert_eq!(id.host, "gitlab.example.com");
        assert_eq!(id.repo, "tool");

        let id = parse_origin_url("git://example.org/org/repo").unwrap();
        assert_eq!(id.repo, "repo");

        assert!(parse_origin_url("not a url").is_none());
        assert!(parse_origin_url("https://github.com/only-owner").is_none());
    }

    #[test]
    fn flattening_removes_separators_and_is_idempotent() {
        for branch in ["feature/x", "a/b/c", "plain", "fix\\win"] {
            let once = flatten_branch(branch);
            assert!(!once.contains('/'));
            assert!(!once.contains('\\'));
            assert_eq!(flatten_branch(&once), once);
        }
        assert_eq!(flatten_branch("feature/foo"), flatten_branch("feature-foo"));
    }

    #[test]
    fn compute_path_is_deterministic() {
        let planner = PathPlanner::new("/home/me/.worktrees/github.com/me/repo");
        let a = planner.compute_path("feature/login").unwrap();
        let b = planner.compute_path("feature/login").unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a,
            PathBuf::from("/home/me/.worktrees/github.com/me/repo/feature-login")
        );
    }

    #[test]
    fn compute_path_rejects_degenerate_names() {
        let planner = PathPlanner::new("/wt");
        for bad in ["", "   ", "/", "//", ".", ".."] {
            assert!(
                matches!(planner.compute_path(bad), Err(GwError::InvalidBranchName(_))),
                "expected rejection for {bad:?}"
            );
        }
        assert!(PathPlanner::new("").compute_path("x").is_ok());
    }

    #[test]
    fn base_uses_remote_identity() {
        let fake = FakeVcs::new("/home/me/src/gw");
        fake.set_remote("origin", "git@github.com:sh0o0/gw.git");
        let planner =
            PathPlanner::for_repo(&fake, Path::new("/home/me/.worktrees"), Path::new("/home/me"))
                .unwrap();
        assert_eq!(
            planner.base(),
            Path::new("/home/me/.worktrees/github.com/sh0o0/gw")
        );
    }

    #[test]
    fn base_falls_back_to_local_namespace() {
        let fake = FakeVcs::new("/home/me/src/gw");
        let planner =
            PathPlanner::for_repo(&fake, Path::new("/home/me/.worktrees"), Path::new("/home/me"))
                .unwrap();
        assert_eq!(
            planner.base(),
            Path::new("/home/me/.worktrees/local/src/gw")
        );

        let outside =
            PathPlanner::for_repo(&fake, Path::new("/wt"), Path::new("/somewhere/else")).unwrap();
        assert_eq!(outside.base(), Path::new("/wt/local/home/me/src/gw"));
    }
}
