//! Download queue: bounded-concurrency scheduling of a work item batch.
//!
//! The queue coordinates concurrent fetches using a semaphore-based
//! concurrency control pattern: items are taken in batch (FIFO) order, a
//! permit is acquired before each item is scheduled, and the permit is
//! released (RAII) when the item's fetch, write, and recording complete.
//! Acquiring the permit is the backpressure: no more than the configured
//! limit of fetches is ever in flight, regardless of batch size.
//!
//! # Concurrency Model
//!
//! - Each work item runs in its own Tokio task
//! - A fresh semaphore is created per submission, so a superseded run that
//!   is still draining cannot starve the next run of permits
//! - The cancellation flag is consulted before each item's fetch begins;
//!   a cancelled item is skipped and recorded as neither success nor failure
//! - `submit` returns only after every scheduled task has finished, which
//!   is the batch's completion detection

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::artifact::{self, ArtifactError, ArtifactStore};
use crate::batch::WorkItem;
use crate::fetch::{FetchError, Fetcher};
use crate::progress::ProgressTracker;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default number of concurrent in-flight fetches.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Error type for queue construction and scheduling.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Failure of a single work item at either pipeline stage.
///
/// Item failures are reported to the observer and never abort the batch.
#[derive(Debug, Error)]
pub enum ItemError {
    /// The fetch stage failed (transport error, timeout, error status).
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The write or validation stage failed.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Bounded-concurrency scheduler for one batch of work items.
#[derive(Debug, Clone)]
pub struct DownloadQueue {
    concurrency: usize,
}

impl DownloadQueue {
    /// Creates a queue with the given concurrency limit (1-100).
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidConcurrency`] if the value is outside
    /// the valid range.
    pub fn new(concurrency: usize) -> Result<Self, QueueError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(QueueError::InvalidConcurrency { value: concurrency });
        }
        Ok(Self { concurrency })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Schedules all items and drives them to completion.
    ///
    /// Items start in batch order, at most `concurrency` in flight. Each
    /// item is fetched, written to the store, and recorded on the tracker;
    /// failures are recorded and do not abort the batch. Once the tracker
    /// reports cancellation, remaining items are skipped. Returns after
    /// every scheduled task has finished and the final paths notification
    /// has been flushed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SemaphoreClosed`] if the internal semaphore is
    /// closed, which does not happen in normal operation. Individual item
    /// failures do NOT cause this method to error.
    #[instrument(skip_all, fields(items = items.len(), concurrency = self.concurrency))]
    pub async fn submit(
        &self,
        items: Vec<WorkItem>,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<ArtifactStore>,
        tracker: Arc<ProgressTracker>,
    ) -> Result<(), QueueError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(items.len());

        info!("starting batch");

        for item in items {
            if tracker.is_cancelled() {
                debug!(index = item.index, "cancellation observed, not scheduling remaining items");
                break;
            }

            // Acquire permit before scheduling (blocks at the concurrency limit)
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| QueueError::SemaphoreClosed)?;

            let fetcher = Arc::clone(&fetcher);
            let store = Arc::clone(&store);
            let tracker = Arc::clone(&tracker);

            handles.push(tokio::spawn(async move {
                // Permit is dropped when this block exits (RAII)
                let _permit = permit;

                if tracker.is_cancelled() {
                    debug!(index = item.index, "item skipped after cancellation");
                    return;
                }

                match process_item(fetcher.as_ref(), &store, &tracker, &item).await {
                    Some(Ok(path)) => {
                        info!(index = item.index, path = %path.display(), "item completed");
                        tracker.record_completion(item.index, path);
                    }
                    Some(Err(e)) => {
                        warn!(index = item.index, url = %item.url, error = %e, "item failed");
                        tracker.record_failure(item.index, item.url.as_str(), &e.to_string());
                    }
                    None => {}
                }
            }));
        }

        debug!(task_count = handles.len(), "waiting for batch to complete");

        for handle in handles {
            // Task panics are logged but don't fail the batch
            if let Err(e) = handle.await {
                warn!(error = %e, "download task panicked");
            }
        }

        tracker.flush_paths();
        info!(
            completed = tracker.completed(),
            failed = tracker.failed(),
            total = tracker.total(),
            "batch complete"
        );
        Ok(())
    }
}

/// Runs one work item through fetch, write, and validation.
///
/// Returns `None` when cancellation was observed after the fetch landed;
/// the fetched bytes are discarded without touching the working directory.
async fn process_item(
    fetcher: &dyn Fetcher,
    store: &ArtifactStore,
    tracker: &ProgressTracker,
    item: &WorkItem,
) -> Option<Result<PathBuf, ItemError>> {
    let bytes = match fetcher.fetch(&item.url).await {
        Ok(bytes) => bytes,
        Err(e) => return Some(Err(e.into())),
    };

    if tracker.is_cancelled() {
        debug!(index = item.index, "fetched bytes discarded after cancellation");
        return None;
    }

    let ext = artifact::extension_for(&item.url);
    match store.write(item.index, ext, &bytes).await {
        Ok(path) => Some(Ok(path)),
        Err(e) => Some(Err(e.into())),
    }
}
