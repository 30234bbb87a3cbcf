#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::core::git::Vcs;
use crate::error::GwError;

/// Lifecycle of a branch. `Unknown` doubles as "not resolved yet" and
/// "not applicable" (detached HEAD, primary worktree).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum BranchStatus {
    Merged = 1,
    Closed = 2,
    Opened = 3,
    InProgress = 4,
    NotStarted = 5,
    #[default]
    Unknown = 6,
}

/// Width of the widest display label, used to align picker columns.
pub const STATUS_COLUMN_WIDTH: usize = "IN PROGRESS".len();

impl BranchStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Merged => "merged",
            Self::Closed => "closed",
            Self::Opened => "opened",
            Self::InProgress => "in-progress",
            Self::NotStarted => "not-started",
            Self::Unknown => "",
        }
    }

    #[must_use]
    pub fn display_label(self) -> &'static str {
        match self {
            Self::Merged => "MERGED",
            Self::Closed => "CLOSED",
            Self::Opened => "OPENED",
            Self::InProgress => "IN PROGRESS",
            Self::NotStarted => "NOT STARTED",
            Self::Unknown => "",
        }
    }

    /// Maps the review tool's state vocabulary. Anything unrecognised is no
    /// verdict.
    #[must_use]
    pub fn from_review_state(state: &str) -> Option<Self> {
        match state.trim().to_ascii_uppercase().as_str() {
            "MERGED" => Some(Self::Merged),
            "CLOSED" => Some(Self::Closed),
            "OPEN" => Some(Self::Opened),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Merged),
            2 => Some(Self::Closed),
            3 => Some(Self::Opened),
            4 => Some(Self::InProgress),
            5 => Some(Self::NotStarted),
            6 => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the review system knows about a branch. `status: None` is cached the
/// same way as a verdict so the lookup is not repeated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewRecord {
    pub status: Option<BranchStatus>,
    pub assignees: Vec<String>,
}

pub trait ReviewProvider: Send + Sync {
    fn lookup(&self, dir: &Path, branch: &str) -> Result<ReviewRecord, GwError>;
}

/// GitHub CLI backed review lookups (`gh pr view`).
#[derive(Debug, Clone)]
pub struct GhCli {
    program: PathBuf,
}

#[derive(Debug, Deserialize)]
struct GhPrView {
    #[serde(default)]
    state: String,
    #[serde(default)]
    assignees: Vec<GhUser>,
}

#[derive(Debug, Deserialize)]
struct GhUser {
    #[serde(default)]
    login: String,
}

impl GhCli {
    /// `None` when `gh` is not on PATH.
    #[must_use]
    pub fn detect() -> Option<Self> {
        match which::which("gh") {
            Ok(program) => Some(Self { program }),
            Err(e) => {
                log::debug!("gh not available, review status disabled: {e}");
                None
            }
        }
    }

    #[must_use]
    pub fn at(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ReviewProvider for GhCli {
    fn lookup(&self, dir: &Path, branch: &str) -> Result<ReviewRecord, GwError> {
        log::debug!("gh pr view {branch} (in {})", dir.display());
        let out = Command::new(&self.program)
            .args(["pr", "view", branch, "--json", "state,assignees"])
            .current_dir(dir)
            .output()
            .map_err(|e| GwError::Other(format!("failed to run gh: {e}")))?;
        if !out.status.success() {
            return Err(GwError::Other(format!(
                "gh pr view {branch}: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(parse_review_output(&String::from_utf8_lossy(&out.stdout)))
    }
}

pub(crate) fn parse_review_output(stdout: &str) -> ReviewRecord {
    match serde_json::from_str::<GhPrView>(stdout) {
        Ok(view) => ReviewRecord {
            status: BranchStatus::from_review_state(&view.state),
            assignees: view
                .assignees
                .into_iter()
                .map(|u| u.login)
                .filter(|l| !l.is_empty())
                .collect(),
        },
        // Older wrappers print the bare state word.
        Err(_) => ReviewRecord {
            status: BranchStatus::from_review_state(stdout),
            assignees: Vec::new(),
        },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusInfo {
    pub status: BranchStatus,
    pub assignees: Vec<String>,
}

impl StatusInfo {
    fn of(status: BranchStatus) -> Self {
        Self {
            status,
            assignees: Vec::new(),
        }
    }

    /// `a,b` joined; empty when nobody is assigned.
    #[must_use]
    pub fn assignees_joined(&self) -> String {
        self.assignees.join(",")
    }
}

pub struct StatusResolver {
    vcs: Arc<dyn Vcs>,
    review: Option<Arc<dyn ReviewProvider>>,
    base_ref: Option<String>,
    cache: Mutex<HashMap<String, ReviewRecord>>,
}

impl StatusResolver {
    /// Detects the base ref once, relative to the repository root. Passing
    /// `review: None` disables the external tier for this resolver's lifetime.
    pub fn new(vcs: Arc<dyn Vcs>, review: Option<Arc<dyn ReviewProvider>>) -> Self {
        let base_ref = detect_base_ref(vcs.as_ref(), vcs.repo_root());
        log::debug!("status base ref: {base_ref:?}");
        Self {
            vcs,
            review,
            base_ref,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolver backed by `gh` when it is installed.
    pub fn with_default_review(vcs: Arc<dyn Vcs>) -> Self {
        let review = GhCli::detect().map(|gh| Arc::new(gh) as Arc<dyn ReviewProvider>);
        Self::new(vcs, review)
    }

    #[must_use]
    pub fn base_ref(&self) -> Option<&str> {
        self.base_ref.as_deref()
    }

    pub fn status(&self, path: &Path, branch: &str) -> BranchStatus {
        self.status_info(path, branch).status
    }

    pub fn status_info(&self, path: &Path, branch: &str) -> StatusInfo {
        if branch.is_empty() || branch == "HEAD" {
            return StatusInfo::default();
        }

        let record = self.review_record(path, branch);
        if let Some(verdict) = record.status {
            return StatusInfo {
                status: verdict,
                assignees: record.assignees,
            };
        }

        match self.vcs.has_changes(path) {
            Ok(true) => return StatusInfo::of(BranchStatus::InProgress),
            Ok(false) => {}
            Err(e) => {
                log::debug!("dirty check failed for {}: {e}", path.display());
                return StatusInfo::default();
            }
        }

        if self.has_local_commits(path) {
            StatusInfo::of(BranchStatus::InProgress)
        } else {
            StatusInfo::of(BranchStatus::NotStarted)
        }
    }

    fn review_record(&self, path: &Path, branch: &str) -> ReviewRecord {
        let Some(review) = &self.review else {
            return ReviewRecord::default();
        };

        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(branch)
        {
            log::debug!("review cache hit for {branch}");
            return hit.clone();
        }

        let record = review.lookup(path, branch).unwrap_or_else(|e| {
            log::debug!("review lookup for {branch} failed: {e}");
            ReviewRecord::default()
        });
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(branch.to_owned(), record.clone());
        record
    }

    /// A failed `rev-list` counts as not ahead.
    fn has_local_commits(&self, path: &Path) -> bool {
        let Some(base) = self.base_ref.as_deref() else {
            return false;
        };
        if !self.vcs.ref_exists(path, base) {
            return false;
        }
        match self.vcs.commits_ahead(path, base) {
            Ok(n) => n > 0,
            Err(e) => {
                log::debug!("ahead check failed for {}: {e}", path.display());
                false
            }
        }
    }
}

/// Remote default branch, then `main`/`master` by convention, then whatever
/// `dir` has checked out.
pub fn detect_base_ref(vcs: &dyn Vcs, dir: &Path) -> Option<String> {
    if let Some(remote_head) = vcs.remote_default_branch() {
        return Some(remote_head);
    }
    for candidate in ["origin/main", "origin/master", "main", "master"] {
        if vcs.ref_exists(dir, candidate) {
            return Some(candidate.to_owned());
        }
    }
    vcs.current_branch(dir)
        .ok()
        .flatten()
        .filter(|b| b != "HEAD")
}
