//! Conditional JSON GET backed by a bounded ETag cache.
//!
//! The first request for a URI is a plain GET. Later requests for the same
//! URI carry `If-None-Match` / `If-Modified-Since` built from the cached
//! validators; a `304 Not Modified` answer returns the cached body as-is.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use tokio::sync::Mutex;
use tracing::debug;

use crate::cache::BoundedCache;
use crate::error::{CostaError, CostaResult};

/// Per-request timeout for registry queries.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Default number of registry responses kept in memory.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Validators and body of a previous `200 OK` response.
#[derive(Debug, Clone)]
pub struct HttpCacheEntry {
    /// `ETag` response header, if any.
    pub etag: Option<String>,
    /// `Last-Modified` response header, if any.
    pub last_modified: Option<String>,
    /// Parsed response body.
    pub body: Arc<serde_json::Value>,
}

/// JSON fetcher that revalidates cached responses instead of re-downloading.
///
/// The cache is owned by the fetcher; concurrent fetches of the same URI may
/// race, in which case the last completed response wins.
#[derive(Debug)]
pub struct ConditionalHttpFetcher {
    client: reqwest::Client,
    cache: Mutex<BoundedCache<HttpCacheEntry>>,
}

impl ConditionalHttpFetcher {
    /// Create a fetcher caching up to `capacity` responses.
    ///
    /// # Errors
    ///
    /// Returns `CostaError::Fetch` if the HTTP client cannot be built.
    pub fn new(capacity: usize) -> CostaResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("costa/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                CostaError::fetch("<client>", format!("failed to create HTTP client: {e}"))
            })?;
        Ok(Self::with_client(client, capacity))
    }

    /// Create a fetcher around an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, capacity: usize) -> Self {
        Self {
            client,
            cache: Mutex::new(BoundedCache::new(capacity)),
        }
    }

    /// GET `uri` and return its JSON body.
    ///
    /// # Errors
    ///
    /// Returns `CostaError::Fetch` on transport failures or any status other
    /// than 200/304, and `CostaError::Json` if a fresh body is not JSON.
    pub async fn fetch(&self, uri: &str) -> CostaResult<Arc<serde_json::Value>> {
        // The lock is released before the request goes out.
        let cached = self.cache.lock().await.get(uri).cloned();

        let mut request = self.client.get(uri);
        if let Some(entry) = &cached {
            if let Some(etag) = &entry.etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = &entry.last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| CostaError::fetch(uri, e.to_string()))?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED
            && let Some(entry) = cached
        {
            debug!(uri, "registry response not modified, using cached body");
            return Ok(entry.body);
        }

        if status != StatusCode::OK {
            return Err(CostaError::fetch(
                uri,
                status
                    .canonical_reason()
                    .map_or_else(|| status.to_string(), ToString::to_string),
            ));
        }

        let etag = header_string(&response, ETAG);
        let last_modified = header_string(&response, LAST_MODIFIED);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CostaError::fetch(uri, e.to_string()))?;
        let body: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| CostaError::json(uri, e))?;
        let body = Arc::new(body);

        debug!(uri, etag = ?etag, "cached registry response");
        self.cache.lock().await.put(
            uri,
            HttpCacheEntry {
                etag,
                last_modified,
                body: Arc::clone(&body),
            },
        );
        Ok(body)
    }

    /// Number of cached responses.
    pub async fn cached_len(&self) -> usize {
        self.cache.lock().await.len()
    }
}

fn header_string(
    response: &reqwest::Response,
    name: reqwest::header::HeaderName,
) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}
