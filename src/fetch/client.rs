//! HTTP-backed fetch capability.
//!
//! One pooled `reqwest` client is built up front and shared across all
//! concurrent fetches, so connection reuse works across a whole batch.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use super::error::FetchError;
use super::Fetcher;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (60 seconds; image payloads are small).
pub const READ_TIMEOUT_SECS: u64 = 60;

/// Default User-Agent identifying the tool.
fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("imagefetch/{version}")
}

/// Fetcher backed by a pooled HTTP client.
///
/// Designed to be created once and reused for every item in a batch.
/// Redirects follow reqwest's default policy; there is no retry.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    /// Creates a fetcher with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 30 seconds
    /// - Read timeout: 60 seconds
    /// - Gzip decompression: enabled
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a fetcher with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(default_user_agent())
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
        debug!("starting fetch");

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(url.as_str())
            } else {
                FetchError::network(url.as_str(), e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(url.as_str(), status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(url.as_str())
            } else {
                FetchError::network(url.as_str(), e)
            }
        })?;

        debug!(bytes = bytes.len(), "fetch complete");
        Ok(bytes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_default_user_agent_contains_crate_version() {
        let ua = default_user_agent();
        assert!(ua.starts_with("imagefetch/"));
        assert!(ua.contains(env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn test_fetch_returns_body_bytes() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/photo.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg bytes"))
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new();
        let url = Url::parse(&format!("{}/photo.jpg", mock_server.uri())).unwrap();

        let bytes = fetcher.fetch(&url).await.unwrap();
        assert_eq!(bytes.as_ref(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_fetch_404_maps_to_http_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new();
        let url = Url::parse(&format!("{}/missing.jpg", mock_server.uri())).unwrap();

        let result = fetcher.fetch(&url).await;
        match result {
            Err(FetchError::HttpStatus { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected HttpStatus error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_500_maps_to_http_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/error.jpg"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new();
        let url = Url::parse(&format!("{}/error.jpg", mock_server.uri())).unwrap();

        let result = fetcher.fetch(&url).await;
        assert!(matches!(
            result,
            Err(FetchError::HttpStatus { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_slow_body_times_out() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/slow.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"data")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new_with_timeouts(30, 1);
        let url = Url::parse(&format!("{}/slow.jpg", mock_server.uri())).unwrap();

        let result = fetcher.fetch(&url).await;
        assert!(
            matches!(
                result,
                Err(FetchError::Timeout { .. }) | Err(FetchError::Network { .. })
            ),
            "expected timeout or network error, got: {result:?}"
        );
    }

    #[test]
    fn test_fetch_connection_refused_maps_to_network() {
        let fetcher = HttpFetcher::new_with_timeouts(1, 1);
        // Reserved TEST-NET-1 address; nothing listens there.
        let url = Url::parse("http://192.0.2.1:9/photo.jpg").unwrap();

        let result = tokio_test::block_on(fetcher.fetch(&url));
        assert!(
            matches!(
                result,
                Err(FetchError::Network { .. }) | Err(FetchError::Timeout { .. })
            ),
            "expected network or timeout error, got: {result:?}"
        );
    }
}
