//! Batch validation and work item types.
//!
//! A run starts from a flat list of URL strings. Validation happens once,
//! before anything is scheduled: each entry either becomes a [`WorkItem`]
//! carrying its original batch index, or is rejected with a
//! [`BatchError::InvalidUrl`] that the controller reports to the observer.
//! Rejected entries keep their index so error messages stay correlated with
//! the input order.

use thiserror::Error;
use tracing::debug;
use url::Url;

/// Errors detected while validating a URL batch.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The URL is malformed or uses a non-HTTP scheme.
    #[error("invalid URL at index {index}: {url}")]
    InvalidUrl {
        /// Position of the entry in the original batch.
        index: usize,
        /// The rejected input string.
        url: String,
    },
}

/// One URL to fetch paired with its stable batch index.
///
/// The index is the item's position in the original batch and doubles as the
/// artifact's filename key (`image_<index>.<ext>`). Indices within one run
/// are unique; excluding invalid entries leaves gaps rather than renumbering.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Validated fetch target.
    pub url: Url,
    /// Position in the original batch.
    pub index: usize,
}

/// Outcome of validating a URL batch: the submittable items and the
/// individually rejected entries.
#[derive(Debug, Default)]
pub struct ValidatedBatch {
    /// Items that passed validation, in batch order.
    pub items: Vec<WorkItem>,
    /// Per-entry rejections, in batch order.
    pub rejected: Vec<BatchError>,
}

impl ValidatedBatch {
    /// Returns true when no entry passed validation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Validates a batch of URL strings, partitioning it into work items and
/// per-entry rejections.
///
/// A URL is accepted when it parses per URI syntax and uses the `http` or
/// `https` scheme. Each entry is validated independently, so some may be
/// rejected while the rest of the batch proceeds.
#[must_use]
pub fn validate_batch(urls: &[String]) -> ValidatedBatch {
    let mut batch = ValidatedBatch::default();

    for (index, raw) in urls.iter().enumerate() {
        match validate_url(raw) {
            Some(url) => {
                debug!(index, url = %url, "URL validated");
                batch.items.push(WorkItem { url, index });
            }
            None => {
                debug!(index, url = %raw, "URL rejected");
                batch.rejected.push(BatchError::InvalidUrl {
                    index,
                    url: raw.clone(),
                });
            }
        }
    }

    batch
}

/// Parses and validates a single URL, returning `None` when it is unusable.
fn validate_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}
