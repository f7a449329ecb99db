//! Backend client — one HTTP round trip per lookup against the remote store.
//!
//! The backend exposes `GET {base}/collections/{collection}?value={key}` and
//! answers with a JSON document. [`BackendClient`] performs exactly that
//! request and classifies every way it can go wrong into a [`FetchError`].
//! It never retries; a failed lookup is reported once.
//!
//! The [`Fetch`] trait is the seam the cache depends on, so the cache can be
//! driven by an in-process fake in tests.

use std::future::Future;
use std::time::Duration;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Characters escaped when a collection name is placed in a path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'+')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Ways a backend lookup can fail.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The backend could not be reached, timed out, or dropped the response body.
    #[error("backend request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The backend answered with a non-2xx status.
    #[error("backend responded with status {status}")]
    Backend { status: u16 },

    /// The backend answered 2xx but the body is not JSON.
    #[error("backend response is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    /// The backend's status code, for [`FetchError::Backend`] only.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Backend { status } => Some(*status),
            _ => None,
        }
    }
}

/// Resolves one `(collection, key)` pair into a decoded value.
pub trait Fetch: Send + Sync {
    fn fetch(
        &self,
        collection: &str,
        key: &str,
    ) -> impl Future<Output = Result<Value, FetchError>> + Send;
}

/// HTTP client for the remote key-value store.
///
/// Cloning is cheap; clones share the underlying connection pool.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use readthru::backend::{BackendClient, Fetch};
///
/// # async fn example() -> Result<(), readthru::backend::FetchError> {
/// let client = BackendClient::new("http://localhost:8080", Duration::from_secs(10))?;
/// let value = client.fetch("items", "x").await?;
/// println!("{value}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    /// Builds a client whose every request is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Transport`] if the TLS backend or resolver
    /// cannot be initialised.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Transport)?;
        Ok(Self::with_client(client, base_url))
    }

    /// Wraps an already configured [`reqwest::Client`].
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/collections/{}",
            self.base_url,
            utf8_percent_encode(collection, PATH_SEGMENT)
        )
    }
}

impl Fetch for BackendClient {
    async fn fetch(&self, collection: &str, key: &str) -> Result<Value, FetchError> {
        let url = self.collection_url(collection);
        debug!(%url, key, "fetching from backend");

        let response = self
            .client
            .get(&url)
            .query(&[("value", key)])
            .send()
            .await
            .map_err(FetchError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            warn!(%url, key, status = status.as_u16(), "backend rejected lookup");
            return Err(FetchError::Backend {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(FetchError::Transport)?;
        Ok(serde_json::from_slice(&body)?)
    }
}
