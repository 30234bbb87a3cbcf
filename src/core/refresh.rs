#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::core::relocate::same_location;
use crate::core::status::{BranchStatus, STATUS_COLUMN_WIDTH, StatusInfo, StatusResolver};
use crate::core::worktree::Worktree;

const LOADING: u8 = 0;
const LOADING_LABEL: &str = "LOADING";

/// A worktree row as the picker sees it. Status and assignees are written by
/// loader tasks and read by the render path without the collection lock.
#[derive(Debug)]
pub struct WorktreeEntry {
    pub display_branch: String,
    pub branch: Option<String>,
    pub path: PathBuf,
    pub is_primary: bool,
    pub is_current: bool,
    status: AtomicU8,
    assignees: Mutex<String>,
}

impl WorktreeEntry {
    #[must_use]
    pub fn new(wt: &Worktree, primary: &Path, current: Option<&Path>) -> Self {
        let branch = wt
            .branch
            .clone()
            .filter(|b| !b.is_empty() && b != "HEAD");
        let is_primary = same_location(&wt.path, primary);
        let initial = if is_primary || branch.is_none() {
            BranchStatus::Unknown.to_u8()
        } else {
            LOADING
        };
        Self {
            display_branch: branch.clone().unwrap_or_else(|| "(detached)".to_owned()),
            branch,
            path: wt.path.clone(),
            is_primary,
            is_current: current.is_some_and(|c| same_location(&wt.path, c)),
            status: AtomicU8::new(initial),
            assignees: Mutex::new(String::new()),
        }
    }

    /// Only named, non-primary worktrees get a status lookup.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        !self.is_primary && self.branch.is_some()
    }

    /// `None` while the loader has not reported yet.
    #[must_use]
    pub fn status(&self) -> Option<BranchStatus> {
        match self.status.load(Ordering::Acquire) {
            LOADING => None,
            v => BranchStatus::from_u8(v),
        }
    }

    #[must_use]
    pub fn assignees(&self) -> String {
        self.assignees
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stores a resolution, returning whether anything visible changed.
    pub fn store(&self, info: &StatusInfo) -> bool {
        let mut changed = false;

        let new_status = info.status.to_u8();
        if self.status.swap(new_status, Ordering::AcqRel) != new_status {
            changed = true;
        }

        let joined = info.assignees_joined();
        let mut assignees = self.assignees.lock().unwrap_or_else(PoisonError::into_inner);
        if *assignees != joined {
            *assignees = joined;
            changed = true;
        }
        changed
    }

    fn status_label(&self) -> &'static str {
        if self.is_primary {
            return "";
        }
        self.status().map_or(LOADING_LABEL, BranchStatus::display_label)
    }

    /// `[branch]  STATUS       @a,b  /path`, with the branch column padded to
    /// `branch_width`.
    #[must_use]
    pub fn render(&self, branch_width: usize, show_path: bool) -> String {
        let status = self.status_label();
        let assignees = self.assignees();

        let mut s = format!("[{}]", self.display_branch);
        let pad = branch_width.saturating_sub(self.display_branch.chars().count());
        s.extend(std::iter::repeat_n(' ', pad));

        if !status.is_empty() || !assignees.is_empty() || show_path {
            s.push_str("  ");
        }
        if !status.is_empty() {
            s.push_str(&format!("{status:<width$}", width = STATUS_COLUMN_WIDTH));
        } else if !assignees.is_empty() || show_path {
            s.extend(std::iter::repeat_n(' ', STATUS_COLUMN_WIDTH));
        }
        if !assignees.is_empty() {
            s.push_str("  @");
            s.push_str(&assignees);
        }
        if show_path {
            s.push_str("  ");
            s.push_str(&self.path.to_string_lossy());
        }
        s
    }
}

#[derive(Debug, Default)]
struct RedrawState {
    pending_redraw: bool,
    generation: u64,
}

/// Ordered entries plus a debounced redraw signal for the picker.
///
/// The picker polls `generation()` and redraws whenever it moves. Bursts of
/// `invalidate()` calls inside one debounce window produce a single pending
/// redraw, and the window closing bumps the generation again so values stored
/// meanwhile become visible.
#[derive(Debug)]
pub struct WorktreeCollection {
    base: Vec<Arc<WorktreeEntry>>,
    state: Mutex<RedrawState>,
    debounce: Duration,
    show_path: bool,
    branch_width: usize,
}

impl WorktreeCollection {
    #[must_use]
    pub fn new(entries: Vec<WorktreeEntry>, debounce: Duration, show_path: bool) -> Self {
        let branch_width = entries
            .iter()
            .map(|e| e.display_branch.chars().count())
            .max()
            .unwrap_or(0);
        Self {
            base: entries.into_iter().map(Arc::new).collect(),
            state: Mutex::new(RedrawState::default()),
            debounce,
            show_path,
            branch_width,
        }
    }

    /// Builds entries from a listing, dropping the ones `skip` rejects.
    #[must_use]
    pub fn from_worktrees(
        worktrees: &[Worktree],
        primary: &Path,
        current: Option<&Path>,
        skip: impl Fn(&WorktreeEntry) -> bool,
        debounce: Duration,
        show_path: bool,
    ) -> Self {
        let entries = worktrees
            .iter()
            .map(|wt| WorktreeEntry::new(wt, primary, current))
            .filter(|e| !skip(e))
            .collect();
        Self::new(entries, debounce, show_path)
    }

    #[must_use]
    pub fn entries(&self) -> &[Arc<WorktreeEntry>] {
        &self.base
    }

    #[must_use]
    pub fn get(&self, i: usize) -> Option<&Arc<WorktreeEntry>> {
        self.base.get(i)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.base.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    #[must_use]
    pub fn item_string(&self, i: usize) -> String {
        self.base
            .get(i)
            .map(|e| e.render(self.branch_width, self.show_path))
            .unwrap_or_default()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RedrawState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.lock_state().generation
    }

    #[must_use]
    pub fn redraw_pending(&self) -> bool {
        self.lock_state().pending_redraw
    }

    /// Base length, plus one while a redraw is pending.
    #[must_use]
    pub fn render_len(&self) -> usize {
        self.base.len() + usize::from(self.redraw_pending())
    }

    /// Requests a redraw. A no-op while one is already pending.
    pub fn invalidate(self: &Arc<Self>) {
        {
            let mut st = self.lock_state();
            if st.pending_redraw {
                return;
            }
            st.pending_redraw = true;
            st.generation += 1;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let this = Arc::clone(self);
                let delay = self.debounce;
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    this.close_window();
                });
            }
            Err(_) => self.close_window(),
        }
    }

    fn close_window(&self) {
        let mut st = self.lock_state();
        if st.pending_redraw {
            st.pending_redraw = false;
            st.generation += 1;
        }
    }

    /// Clears any pending redraw and forces one last generation bump.
    pub fn settle(&self) {
        let mut st = self.lock_state();
        st.pending_redraw = false;
        st.generation += 1;
    }
}

/// Drives a `StatusResolver` over every eligible entry of a collection.
pub struct RefreshCoordinator {
    resolver: Arc<StatusResolver>,
    concurrency: usize,
}

impl RefreshCoordinator {
    /// `concurrency == 0` means one task per available processor. Anything
    /// above the semaphore's permit limit is clamped to it.
    #[must_use]
    pub fn new(resolver: Arc<StatusResolver>, concurrency: usize) -> Self {
        Self {
            resolver,
            concurrency,
        }
    }

    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency > 0 {
            return self.concurrency.min(Semaphore::MAX_PERMITS);
        }
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
            .max(1)
    }

    /// Returns immediately; the handle completes after every lookup has
    /// finished and the collection has settled.
    pub fn start_loader(&self, collection: Arc<WorktreeCollection>) -> JoinHandle<()> {
        let limit = self.effective_concurrency();
        let resolver = Arc::clone(&self.resolver);

        tokio::spawn(async move {
            let sem = Arc::new(Semaphore::new(limit));
            let mut handles = Vec::new();

            for entry in collection.entries().iter().filter(|e| e.is_eligible()) {
                let entry = Arc::clone(entry);
                let sem = Arc::clone(&sem);
                let resolver = Arc::clone(&resolver);
                let collection = Arc::clone(&collection);

                handles.push(tokio::spawn(async move {
                    let Ok(_permit) = sem.acquire_owned().await else {
                        return;
                    };
                    let target = Arc::clone(&entry);
                    let info = tokio::task::spawn_blocking(move || {
                        let branch = target.branch.as_deref().unwrap_or_default();
                        resolver.status_info(&target.path, branch)
                    })
                    .await;
                    match info {
                        Ok(info) => {
                            if entry.store(&info) {
                                collection.invalidate();
                            }
                        }
                        Err(e) => log::warn!("status task for {} failed: {e}", entry.display_branch),
                    }
                }));
            }

            log::debug!("status loader started {} task(s), limit {limit}", handles.len());
            for h in handles {
                if let Err(e) = h.await {
                    log::warn!("status task join error: {e}");
                }
            }
            collection.settle();
            log::debug!("status loader settled");
        })
    }
}
