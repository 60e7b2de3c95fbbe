//! Fetch capability for retrieving remote image bytes.
//!
//! The engine never talks to the network directly; it goes through the
//! [`Fetcher`] trait so tests can substitute deterministic implementations
//! and the transport policy (timeouts, redirects) stays in one place.
//! [`HttpFetcher`] is the production implementation backed by a pooled
//! `reqwest` client.
//!
//! # Example
//!
//! ```no_run
//! use imagefetch::{Fetcher, HttpFetcher};
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = HttpFetcher::new();
//! let url = Url::parse("https://example.com/photo.jpg")?;
//! let bytes = fetcher.fetch(&url).await?;
//! println!("fetched {} bytes", bytes.len());
//! # Ok(())
//! # }
//! ```

mod client;
mod error;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

pub use client::HttpFetcher;
pub use error::FetchError;

/// Capability for fetching the raw bytes behind a URL.
///
/// One call per work item; the engine applies no retry of its own, so an
/// implementation that wants retries or timeouts must provide them itself.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches the resource at `url`, returning its full body.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failure, timeout, or a
    /// non-success HTTP status.
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError>;
}
