#![forbid(unsafe_code)]

pub mod git;
pub mod naming;
pub mod refresh;
pub mod relocate;
pub mod status;
pub mod symlink;
pub mod worktree;

#[cfg(test)]
pub(crate) mod testing;
