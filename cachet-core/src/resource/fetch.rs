//! Upstream fetch primitive
//!
//! The cache only needs one thing from an HTTP client: issue `method url`
//! with a bounded timeout and hand back status, headers and the full body.
//! [`Fetcher`] is that seam; [`HttpFetcher`] is the `reqwest` implementation.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::time::Duration;

/// Network timeout applied to every upstream fetch
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A fully read upstream response
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchedResponse {
    /// Build a response with no headers
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self { status, headers: HeaderMap::new(), body: body.into() }
    }

    /// Add a header, ignoring names or values that are not valid HTTP
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) =
            (http::HeaderName::from_bytes(name.as_bytes()), http::HeaderValue::from_str(value))
        {
            self.headers.append(name, value);
        }
        self
    }
}

/// Errors raised while fetching an upstream resource
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// The HTTP client could not be built
    #[error("HTTP client initialisation failed: {0}")]
    Client(String),

    /// The request could not be built (bad URL, bad method)
    #[error("Invalid upstream request: {0}")]
    Request(String),

    /// Connect, TLS or timeout failure
    #[error("Upstream transport error: {0}")]
    Transport(String),

    /// The body could not be read to the end
    #[error("Failed to read upstream body: {0}")]
    Body(String),
}

/// Timeout-bound `verb url` request primitive used by every resource
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url` with `method` and return the fully read response
    async fn fetch(&self, method: &Method, url: &str) -> Result<FetchedResponse, FetchError>;
}

/// [`Fetcher`] backed by a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with the default 10 second timeout
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(FETCH_TIMEOUT)
    }

    /// Create a fetcher with a custom timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, method: &Method, url: &str) -> Result<FetchedResponse, FetchError> {
        let url = reqwest::Url::parse(url).map_err(|e| FetchError::Request(e.to_string()))?;

        let response = self
            .client
            .request(method.clone(), url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| FetchError::Body(e.to_string()))?;

        Ok(FetchedResponse { status, headers, body })
    }
}
