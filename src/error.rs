#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GwError {
    #[error("not inside a git repository")]
    NotInGitRepo,

    #[error("git is required but was not found in PATH")]
    GitNotFound,

    #[error("git {args}: {stderr}")]
    Git { args: String, stderr: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid config key '{0}'")]
    InvalidConfigKey(String),

    #[error("invalid config value for '{key}': {msg}")]
    InvalidConfigValue { key: String, msg: String },

    #[error("invalid branch name '{0}': worktree path would be empty or root")]
    InvalidBranchName(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("no worktree found for branch: {0}")]
    WorktreeNotFound(String),

    #[error("cannot move primary worktree: {}", .0.display())]
    PrimaryProtected(PathBuf),

    #[error("cannot move detached worktree: {}", .0.display())]
    DetachedProtected(PathBuf),

    #[error("worktree branch mismatch: expected {expected}, got {actual}")]
    BranchMismatch { expected: String, actual: String },

    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("{hook} hook command failed ({status}): {command}")]
    HookFailed {
        hook: String,
        command: String,
        status: String,
    },

    #[error("failed to link {} after {created} symlink(s): {source}", path.display())]
    Symlink {
        created: usize,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("selection cancelled")]
    Cancelled,

    #[error("io error at {}: {source}", path.display())]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl GwError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoPath {
            path: path.into(),
            source,
        }
    }
}
