//! Progress tracking: the serialized mutable state of one run.
//!
//! A [`ProgressTracker`] owns the `RunState` of exactly one run. Every
//! mutation (recording a completion or failure, cancelling) happens inside a
//! single critical section on one mutex, so concurrent workers can never
//! race on the completed count or the path collection, lose an update, or
//! double-count an index. Observer callbacks are invoked after the lock has
//! been released, on a snapshot, so observers may freely re-read state.
//!
//! Each `start` creates a fresh tracker; a cancelled run's tracker is marked
//! cancelled and abandoned. Stale workers still holding it observe the flag
//! and discard their results, which keeps late completions from one run out
//! of the state of the next.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, warn};

use crate::observer::RunObserver;

/// Number of recorded paths accumulated before a paths-changed notification
/// is emitted. The last item of a run always flushes regardless.
pub const PATHS_NOTIFY_BATCH: usize = 10;

/// Terminal outcome of one work item. Absence from the slot map means the
/// item is still pending.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Done(PathBuf),
    Failed,
}

/// The mutable shared state of one run. Mutated only through
/// [`ProgressTracker`]'s serialized API.
#[derive(Debug)]
struct RunState {
    total: usize,
    completed: usize,
    failed: usize,
    /// Terminal outcomes keyed by batch index; ordered iteration gives the
    /// path collection its stable index order.
    slots: std::collections::BTreeMap<usize, Slot>,
    /// Updates accumulated since the last paths-changed notification.
    pending_notify: usize,
    cancelled: bool,
}

/// Serializable snapshot of a run's final (or current) tallies.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Number of items submitted to the run.
    pub total: usize,
    /// Items that produced a validated artifact.
    pub completed: usize,
    /// Items that failed at fetch, write, or validation.
    pub failed: usize,
    /// Artifact paths in batch-index order.
    pub paths: Vec<PathBuf>,
}

/// Thread-safe accumulator for one run's progress and results.
pub struct ProgressTracker {
    state: Mutex<RunState>,
    observer: Arc<dyn RunObserver>,
}

impl ProgressTracker {
    /// Creates a tracker for a run of `total` items.
    #[must_use]
    pub fn new(total: usize, observer: Arc<dyn RunObserver>) -> Self {
        Self {
            state: Mutex::new(RunState {
                total,
                completed: 0,
                failed: 0,
                slots: std::collections::BTreeMap::new(),
                pending_notify: 0,
                cancelled: false,
            }),
            observer,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a successful completion for `index`.
    ///
    /// Ignored when the run is cancelled or the index already has a terminal
    /// outcome (no duplicate counts). Emits `on_progress` after every
    /// accepted update and `on_paths_changed` once
    /// [`PATHS_NOTIFY_BATCH`] updates have accumulated or the run's last
    /// item completed.
    pub fn record_completion(&self, index: usize, path: PathBuf) {
        let (progress, flush) = {
            let mut state = self.lock_state();
            if state.cancelled {
                debug!(index, "completion discarded after cancellation");
                return;
            }
            if state.slots.contains_key(&index) {
                warn!(index, "duplicate completion ignored");
                return;
            }
            state.slots.insert(index, Slot::Done(path));
            state.completed += 1;
            state.pending_notify += 1;
            debug_assert!(state.completed <= state.total);

            let is_last = state.completed + state.failed == state.total;
            let flush = if state.pending_notify >= PATHS_NOTIFY_BATCH || is_last {
                state.pending_notify = 0;
                Some(collect_paths(&state))
            } else {
                None
            };
            (fraction(state.completed, state.total), flush)
        };

        self.observer.on_progress(progress);
        if let Some(paths) = flush {
            self.observer.on_paths_changed(&paths);
        }
    }

    /// Records a failure for `index`.
    ///
    /// Does not advance the completed count. Ignored when the run is
    /// cancelled or the index already has a terminal outcome. Emits
    /// `on_error` with index, URL, and reason context.
    pub fn record_failure(&self, index: usize, url: &str, reason: &str) {
        {
            let mut state = self.lock_state();
            if state.cancelled {
                debug!(index, "failure discarded after cancellation");
                return;
            }
            if state.slots.contains_key(&index) {
                warn!(index, "duplicate failure ignored");
                return;
            }
            state.slots.insert(index, Slot::Failed);
            state.failed += 1;
        }

        self.observer
            .on_error(&format!("download failed for {url} (index {index}): {reason}"));
    }

    /// Emits a pending batched paths-changed notification, if any.
    ///
    /// Called once at the end of a run so a final partial batch (possible
    /// when some items failed) still reaches the observer.
    pub fn flush_paths(&self) {
        let snapshot = {
            let mut state = self.lock_state();
            if state.cancelled || state.pending_notify == 0 {
                return;
            }
            state.pending_notify = 0;
            collect_paths(&state)
        };
        self.observer.on_paths_changed(&snapshot);
    }

    /// Marks the run cancelled and resets the state to empty.
    ///
    /// Completions and failures arriving after this point are discarded.
    /// Emits `on_progress(0.0)` and an empty `on_paths_changed` so
    /// observers see the reset. Idempotent.
    pub fn cancel(&self) {
        {
            let mut state = self.lock_state();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            state.completed = 0;
            state.failed = 0;
            state.slots.clear();
            state.pending_notify = 0;
        }

        self.observer.on_progress(0.0);
        self.observer.on_paths_changed(&[]);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.lock_state().cancelled
    }

    /// Current completion fraction in [0, 1]. Zero for an empty run.
    #[must_use]
    pub fn progress(&self) -> f32 {
        let state = self.lock_state();
        fraction(state.completed, state.total)
    }

    /// Accumulated artifact paths in batch-index order.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        collect_paths(&self.lock_state())
    }

    /// Number of successfully completed items.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.lock_state().completed
    }

    /// Number of failed items.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.lock_state().failed
    }

    /// Number of items submitted to this run.
    #[must_use]
    pub fn total(&self) -> usize {
        self.lock_state().total
    }

    /// Snapshot of the current tallies and paths.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let state = self.lock_state();
        RunSummary {
            total: state.total,
            completed: state.completed,
            failed: state.failed,
            paths: collect_paths(&state),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn fraction(completed: usize, total: usize) -> f32 {
    if total == 0 {
        0.0
    } else {
        completed as f32 / total as f32
    }
}

fn collect_paths(state: &RunState) -> Vec<PathBuf> {
    state
        .slots
        .values()
        .filter_map(|slot| match slot {
            Slot::Done(path) => Some(path.clone()),
            Slot::Failed => None,
        })
        .collect()
}
