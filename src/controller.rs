//! Run lifecycle control: start, cancel, and completion notification.
//!
//! A [`RunController`] owns the state of at most one active run. `start`
//! validates the batch, resets state, and launches the download queue in a
//! background task; `cancel` flips the cooperative cancellation flag and
//! returns immediately without waiting for in-flight fetches. The terminal
//! `on_finished` notification fires exactly once, when a run that was never
//! cancelled has driven every submitted item to completion or failure.
//!
//! State machine: `Idle → Running → (Completed | Cancelled)`, returning to
//! `Idle` implicitly at the next `start`. Starting while a run is active is
//! rejected; all per-run state lives in that run's tracker, so a superseded
//! run draining in the background can never leak results into its successor.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::artifact::ArtifactStore;
use crate::batch::validate_batch;
use crate::fetch::Fetcher;
use crate::observer::RunObserver;
use crate::progress::{ProgressTracker, RunSummary};
use crate::queue::{DownloadQueue, QueueError};

/// Lifecycle phase of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// No run has started yet (or the last one has been superseded).
    Idle,
    /// A run is active.
    Running,
    /// The last run completed all items and fired `on_finished`.
    Completed,
    /// The last run was cancelled; `on_finished` did not fire.
    Cancelled,
}

/// Errors returned by [`RunController::start`].
#[derive(Debug, Error)]
pub enum ControllerError {
    /// `start` was called while a run is active.
    #[error("a run is already in progress")]
    AlreadyRunning,

    /// The batch was empty or every URL was invalid.
    #[error("no valid URLs to download")]
    NoValidUrls,

    /// Queue construction failed.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// State shared between the controller and the background run driver.
struct ControllerInner {
    phase: RunPhase,
    /// Monotonic run counter; a driver may only finish the run it started.
    run_id: u64,
    /// The current (or most recent) run's tracker.
    tracker: Arc<ProgressTracker>,
    /// Join handle of the current run driver, consumed by [`RunController::wait`].
    driver: Option<JoinHandle<()>>,
}

/// Public-facing lifecycle object wrapping the download queue and progress
/// tracker for one run at a time.
pub struct RunController {
    queue: DownloadQueue,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<ArtifactStore>,
    observer: Arc<dyn RunObserver>,
    inner: Arc<Mutex<ControllerInner>>,
}

impl RunController {
    /// Creates a controller.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidConcurrency`] (wrapped) if
    /// `max_concurrent` is outside 1-100.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: ArtifactStore,
        observer: Arc<dyn RunObserver>,
        max_concurrent: usize,
    ) -> Result<Self, ControllerError> {
        let queue = DownloadQueue::new(max_concurrent)?;
        let tracker = Arc::new(ProgressTracker::new(0, Arc::clone(&observer)));
        Ok(Self {
            queue,
            fetcher,
            store: Arc::new(store),
            observer,
            inner: Arc::new(Mutex::new(ControllerInner {
                phase: RunPhase::Idle,
                run_id: 0,
                tracker,
                driver: None,
            })),
        })
    }

    fn lock_inner(&self) -> MutexGuard<'_, ControllerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a run over `urls`.
    ///
    /// Invalid URLs are reported via `on_error` (with their batch index)
    /// and excluded; the remaining items are submitted with their original
    /// indices. Leftover artifacts from a prior run are cleared before any
    /// download begins. Returns as soon as the run is launched; use
    /// [`wait`](Self::wait) to block until it drains.
    ///
    /// # Errors
    ///
    /// - [`ControllerError::AlreadyRunning`] while a run is active; the
    ///   active run is unaffected.
    /// - [`ControllerError::NoValidUrls`] when the batch is empty or every
    ///   URL is invalid; reported through `on_error` as well, and the
    ///   controller does not transition to `Running`.
    #[instrument(skip_all, fields(urls = urls.len()))]
    pub async fn start(&self, urls: &[String]) -> Result<(), ControllerError> {
        if self.lock_inner().phase == RunPhase::Running {
            return Err(ControllerError::AlreadyRunning);
        }

        let batch = validate_batch(urls);
        for rejected in &batch.rejected {
            warn!(error = %rejected, "rejected batch entry");
            self.observer.on_error(&rejected.to_string());
        }
        if batch.is_empty() {
            self.observer.on_error("no valid URLs to download");
            return Err(ControllerError::NoValidUrls);
        }

        let total = batch.items.len();
        let (tracker, run_id) = {
            let mut inner = self.lock_inner();
            // Re-check under the lock: another start may have won the race.
            if inner.phase == RunPhase::Running {
                return Err(ControllerError::AlreadyRunning);
            }
            inner.run_id += 1;
            inner.phase = RunPhase::Running;
            inner.tracker = Arc::new(ProgressTracker::new(total, Arc::clone(&self.observer)));
            (Arc::clone(&inner.tracker), inner.run_id)
        };

        // Precondition for the new run: no leftover artifacts on disk.
        match self.store.clear().await {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "cleared stale artifacts"),
            Err(e) => warn!(error = %e, "failed to clear stale artifacts"),
        }

        info!(total, run_id, skipped = batch.rejected.len(), "run started");

        let queue = self.queue.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let store = Arc::clone(&self.store);
        let observer = Arc::clone(&self.observer);
        let inner = Arc::clone(&self.inner);
        let items = batch.items;

        let driver = tokio::spawn(async move {
            if let Err(e) = queue
                .submit(items, fetcher, store, Arc::clone(&tracker))
                .await
            {
                warn!(error = %e, "queue submission failed");
            }

            let finished = {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                let current = inner.run_id == run_id
                    && inner.phase == RunPhase::Running
                    && !tracker.is_cancelled();
                if current {
                    inner.phase = RunPhase::Completed;
                }
                current
            };
            if finished {
                info!(run_id, "run complete");
                observer.on_finished();
            }
        });

        self.lock_inner().driver = Some(driver);
        Ok(())
    }

    /// Cancels the active run.
    ///
    /// Sets the cooperative cancellation flag and resets the run state to
    /// empty; items not yet started are skipped, and results of in-flight
    /// fetches are discarded when they land. Does not wait for outstanding
    /// fetches to finish. No-op outside a running run.
    pub fn cancel(&self) {
        let tracker = {
            let mut inner = self.lock_inner();
            if inner.phase != RunPhase::Running {
                debug!(phase = ?inner.phase, "cancel ignored outside a running run");
                return;
            }
            inner.phase = RunPhase::Cancelled;
            Arc::clone(&inner.tracker)
        };
        tracker.cancel();
        info!("run cancelled");
    }

    /// Waits for the current run driver to finish draining.
    ///
    /// After a cancel this still waits for in-flight items to drain (their
    /// results are discarded); it is a convenience for callers that need a
    /// quiesced engine, not part of cancellation itself.
    pub async fn wait(&self) {
        let driver = self.lock_inner().driver.take();
        if let Some(handle) = driver {
            if let Err(e) = handle.await {
                warn!(error = %e, "run driver panicked");
            }
        }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> RunPhase {
        self.lock_inner().phase
    }

    /// Current completion fraction in [0, 1].
    #[must_use]
    pub fn progress(&self) -> f32 {
        self.lock_inner().tracker.progress()
    }

    /// Accumulated artifact paths of the current run, in batch-index order.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock_inner().tracker.paths()
    }

    /// Snapshot of the current run's tallies.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        self.lock_inner().tracker.summary()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use tempfile::TempDir;
    use tokio::sync::watch;
    use url::Url;

    use crate::fetch::FetchError;

    /// Observer that records every notification for assertions.
    #[derive(Default)]
    struct Recording {
        progress: Mutex<Vec<f32>>,
        errors: Mutex<Vec<String>>,
        finished: AtomicUsize,
    }

    impl RunObserver for Recording {
        fn on_progress(&self, progress: f32) {
            self.progress.lock().unwrap().push(progress);
        }
        fn on_error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
        fn on_finished(&self) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Fetcher that succeeds instantly.
    struct InstantFetcher;

    #[async_trait]
    impl Fetcher for InstantFetcher {
        async fn fetch(&self, _url: &Url) -> Result<Bytes, FetchError> {
            Ok(Bytes::from_static(b"image bytes"))
        }
    }

    /// Fetcher that blocks until the gate opens.
    struct GatedFetcher {
        gate: watch::Receiver<bool>,
    }

    #[async_trait]
    impl Fetcher for GatedFetcher {
        async fn fetch(&self, _url: &Url) -> Result<Bytes, FetchError> {
            let mut gate = self.gate.clone();
            let _ = gate.wait_for(|open| *open).await;
            Ok(Bytes::from_static(b"image bytes"))
        }
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("https://example.com/photo_{i}.jpg"))
            .collect()
    }

    fn controller(
        fetcher: Arc<dyn Fetcher>,
        dir: &std::path::Path,
    ) -> (RunController, Arc<Recording>) {
        let recorder = Arc::new(Recording::default());
        let controller = RunController::new(
            fetcher,
            ArtifactStore::new(dir),
            Arc::clone(&recorder) as Arc<dyn RunObserver>,
            4,
        )
        .unwrap();
        (controller, recorder)
    }

    #[tokio::test]
    async fn test_empty_batch_fails_fast_without_transition() {
        let temp_dir = TempDir::new().unwrap();
        let (controller, recorder) = controller(Arc::new(InstantFetcher), temp_dir.path());

        let result = controller.start(&[]).await;

        assert!(matches!(result, Err(ControllerError::NoValidUrls)));
        assert_eq!(controller.phase(), RunPhase::Idle);
        assert_eq!(recorder.errors.lock().unwrap().len(), 1);
        assert_eq!(recorder.finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_invalid_batch_reports_each_entry() {
        let temp_dir = TempDir::new().unwrap();
        let (controller, recorder) = controller(Arc::new(InstantFetcher), temp_dir.path());

        let bad = vec!["not a url".to_string(), "ftp://example.com/a.jpg".to_string()];
        let result = controller.start(&bad).await;

        assert!(matches!(result, Err(ControllerError::NoValidUrls)));
        // One error per rejected entry plus the final no-valid-URLs error.
        assert_eq!(recorder.errors.lock().unwrap().len(), 3);
        assert_eq!(recorder.finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_full_run_completes_and_finishes_once() {
        let temp_dir = TempDir::new().unwrap();
        let (controller, recorder) = controller(Arc::new(InstantFetcher), temp_dir.path());

        controller.start(&urls(3)).await.unwrap();
        controller.wait().await;

        assert_eq!(controller.phase(), RunPhase::Completed);
        assert!((controller.progress() - 1.0).abs() < f32::EPSILON);
        assert_eq!(controller.paths().len(), 3);
        assert_eq!(recorder.finished.load(Ordering::SeqCst), 1);
        assert!(recorder.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_while_running_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let (gate_tx, gate_rx) = watch::channel(false);
        let (controller, _) =
            controller(Arc::new(GatedFetcher { gate: gate_rx }), temp_dir.path());

        controller.start(&urls(4)).await.unwrap();
        let second = controller.start(&urls(2)).await;
        assert!(matches!(second, Err(ControllerError::AlreadyRunning)));

        gate_tx.send(true).unwrap();
        controller.wait().await;
        assert_eq!(controller.phase(), RunPhase::Completed);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_discards_results_and_never_finishes() {
        let temp_dir = TempDir::new().unwrap();
        let (gate_tx, gate_rx) = watch::channel(false);
        let (controller, recorder) =
            controller(Arc::new(GatedFetcher { gate: gate_rx }), temp_dir.path());

        controller.start(&urls(8)).await.unwrap();
        controller.cancel();
        assert_eq!(controller.phase(), RunPhase::Cancelled);

        // Let in-flight fetches finish; their results must be discarded.
        gate_tx.send(true).unwrap();
        controller.wait().await;

        assert_eq!(controller.phase(), RunPhase::Cancelled);
        assert!((controller.progress() - 0.0).abs() < f32::EPSILON);
        assert!(controller.paths().is_empty());
        assert_eq!(recorder.finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_outside_running_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let (controller, recorder) = controller(Arc::new(InstantFetcher), temp_dir.path());

        controller.cancel();
        assert_eq!(controller.phase(), RunPhase::Idle);
        assert!(recorder.progress.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restart_after_completion_resets_state() {
        let temp_dir = TempDir::new().unwrap();
        let (controller, recorder) = controller(Arc::new(InstantFetcher), temp_dir.path());

        controller.start(&urls(3)).await.unwrap();
        controller.wait().await;
        assert_eq!(controller.summary().total, 3);

        controller.start(&urls(1)).await.unwrap();
        let summary_at_start = controller.summary();
        controller.wait().await;

        assert_eq!(summary_at_start.total, 1);
        let summary = controller.summary();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.paths.len(), 1);
        assert_eq!(recorder.finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_restart_after_cancel_begins_clean() {
        let temp_dir = TempDir::new().unwrap();
        let (gate_tx, gate_rx) = watch::channel(false);
        let recorder = Arc::new(Recording::default());

        // Both runs share the gated fetcher; the gate opens before the
        // second run so it completes immediately.
        let controller = RunController::new(
            Arc::new(GatedFetcher { gate: gate_rx }),
            ArtifactStore::new(temp_dir.path()),
            Arc::clone(&recorder) as Arc<dyn RunObserver>,
            4,
        )
        .unwrap();

        controller.start(&urls(4)).await.unwrap();
        controller.cancel();

        gate_tx.send(true).unwrap();
        controller.start(&urls(2)).await.unwrap();
        controller.wait().await;

        assert_eq!(controller.phase(), RunPhase::Completed);
        let summary = controller.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.completed, 2);
        assert_eq!(recorder.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_clears_stale_artifacts() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("image_99.jpg"), b"stale").unwrap();
        let (controller, _) = controller(Arc::new(InstantFetcher), temp_dir.path());

        controller.start(&urls(1)).await.unwrap();
        controller.wait().await;

        assert!(!temp_dir.path().join("image_99.jpg").exists());
        assert!(temp_dir.path().join("image_0.jpg").exists());
    }
}
