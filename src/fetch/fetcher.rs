use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::util::now_ms;

use super::cache::{CacheRecord, ResponseCache};

/// Hard per-request timeout, matching the upstream proxy path's default.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(12);

/// Streamed response size cap.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Cache freshness is clamped to this range regardless of configuration.
const MIN_CACHE_MAX_AGE: Duration = Duration::from_secs(5 * 60);
const MAX_CACHE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors surfaced by a single fetch attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP {0}")]
    HttpStatus(u16),
    /// Request exceeded the hard timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response body was not valid UTF-8
    #[error("Response was not valid UTF-8")]
    InvalidUtf8,
}

impl FetchError {
    /// 5xx, 429 and transport-level failures put the proxy that produced
    /// them on cooldown; client errors and oversized bodies do not.
    pub fn disables_proxy(&self) -> bool {
        match self {
            FetchError::HttpStatus(code) => *code == 429 || *code >= 500,
            FetchError::Network(_) | FetchError::Timeout => true,
            FetchError::ResponseTooLarge | FetchError::InvalidUtf8 => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::HttpStatus(429))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout)
    }
}

/// HTTP GET wrapped around the response cache: fresh hits skip the
/// network entirely, successful fetches are stored, and failed fetches
/// fall back to the last stored body for the same URL. Only a failure
/// with no cached fallback surfaces as an error.
pub struct CachedFetcher {
    client: reqwest::Client,
    cache: Arc<Mutex<ResponseCache>>,
    timeout: Duration,
    max_age: Duration,
}

impl CachedFetcher {
    pub fn new(
        client: reqwest::Client,
        cache: Arc<Mutex<ResponseCache>>,
        timeout: Duration,
        max_age: Duration,
    ) -> Self {
        Self {
            client,
            cache,
            timeout,
            max_age: max_age.clamp(MIN_CACHE_MAX_AGE, MAX_CACHE_MAX_AGE),
        }
    }

    /// Test hook: bypasses the freshness clamp.
    #[cfg(test)]
    fn with_raw_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub async fn fetch(&self, url: &str) -> Result<CacheRecord, FetchError> {
        {
            let mut cache = self.cache.lock().await;
            if let Some(hit) = cache.fresh(url, self.max_age, now_ms()) {
                tracing::debug!(url, age_ms = hit.age(now_ms()).as_millis() as u64, "Cache hit");
                return Ok(hit);
            }
        }

        match self.fetch_live(url).await {
            Ok(record) => {
                self.cache.lock().await.insert(url, record.clone());
                Ok(record)
            }
            Err(e) => {
                // A stale body beats no body at all.
                if let Some(stale) = self.cache.lock().await.any(url) {
                    tracing::warn!(url, error = %e, "Serving stale cache after fetch failure");
                    return Ok(stale);
                }
                Err(e)
            }
        }
    }

    async fn fetch_live(&self, url: &str) -> Result<CacheRecord, FetchError> {
        let request = async {
            let response = self.client.get(url).send().await.map_err(FetchError::Network)?;

            if !response.status().is_success() {
                return Err(FetchError::HttpStatus(response.status().as_u16()));
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let body = read_limited_text(response, MAX_BODY_SIZE).await?;
            Ok(CacheRecord {
                body,
                content_type,
                stored_at_ms: now_ms(),
            })
        };

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| FetchError::Timeout)?
    }
}

async fn read_limited_text(
    response: reqwest::Response,
    limit: usize,
) -> Result<String, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    String::from_utf8(bytes).map_err(|_| FetchError::InvalidUtf8)
}
