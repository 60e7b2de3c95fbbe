//! Observer interface for run progress and lifecycle notifications.
//!
//! The core has no dependency on any particular presentation layer. Anything
//! that wants to render progress, thumbnails, or errors registers a
//! [`RunObserver`] with the [`RunController`](crate::RunController) and
//! receives plain callbacks.
//!
//! Notifications are advisory: an observer may always re-read the full
//! current state through the controller's accessors instead of relying on
//! the incremental callbacks.

use std::path::PathBuf;

/// Callbacks fired by the engine as a run makes progress.
///
/// Callbacks are invoked from worker tasks after the run state lock has been
/// released, so implementations may call back into the controller's
/// accessors without deadlocking. Implementations should return quickly;
/// long-running work belongs on the observer's own thread or task.
pub trait RunObserver: Send + Sync {
    /// Called after each successful completion with the current fraction in [0, 1].
    fn on_progress(&self, progress: f32) {
        let _ = progress;
    }

    /// Called with the accumulated artifact paths, batched by the tracker.
    fn on_paths_changed(&self, paths: &[PathBuf]) {
        let _ = paths;
    }

    /// Called once per recoverable failure (invalid URL, transport error,
    /// write failure, validation failure) with a human-readable message.
    fn on_error(&self, message: &str) {
        let _ = message;
    }

    /// Called exactly once when a run completes without being cancelled.
    fn on_finished(&self) {}
}

/// Observer that ignores every notification.
///
/// Useful for headless runs and as a default in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl RunObserver for NullObserver {}
