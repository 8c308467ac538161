//! The refresh orchestrator.
//!
//! For one feed: consult the rate limiter, walk the proxy candidate
//! ladder (manual template first, then scored proxies, each with a plain
//! and a cache-busted attempt), fall back to a direct fetch, and record
//! proxy statistics and cooldowns along the way. Candidate failures are
//! swallowed into statistics; only total exhaustion or an active rate
//! limit surfaces to the caller.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::fetch::{CacheRecord, CachedFetcher, FetchError, RateLimiter, ResponseCache, FETCH_TIMEOUT};
use crate::proxy::{ProxyCandidate, ProxyRegistry};
use crate::storage::{AppState, MergeOutcome, PostStore, Subscription};
use crate::util::now_ms;

use super::parser::{parse_feed_text, ParseError, ParsedFeed};

#[derive(Debug, Error)]
pub enum RefreshError {
    /// The feed is inside a backoff window; no network call was made.
    #[error("Feed is rate limited, retry in {retry_in:?}")]
    RateLimited { retry_in: Duration },

    /// Every proxy candidate and the direct fetch failed.
    #[error("All fetch candidates failed: {last}")]
    Exhausted { last: String },
}

/// One candidate attempt failure: either the fetch itself or the
/// document it returned.
#[derive(Debug, Error)]
enum CandidateError {
    #[error(transparent)]
    Fetch(FetchError),
    #[error(transparent)]
    Parse(ParseError),
}

impl CandidateError {
    fn disables_proxy(&self) -> bool {
        match self {
            CandidateError::Fetch(e) => e.disables_proxy(),
            CandidateError::Parse(_) => false,
        }
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, CandidateError::Fetch(e) if e.is_rate_limited())
    }

    /// A second, cache-busted attempt only pays off when the first result
    /// may have come from a poisoned cache entry; repeating a full
    /// timeout doubles worst-case latency for no new information.
    fn skip_retry(&self) -> bool {
        matches!(self, CandidateError::Fetch(e) if e.is_timeout())
    }
}

/// What one successful feed refresh produced.
#[derive(Debug)]
pub struct FeedRefreshOutcome {
    pub feed_id: String,
    /// Exact URL that produced the content, proxy wrapping included.
    pub fetched_url: String,
    /// Candidate label, for logging ("manual", a proxy name, "direct").
    pub via: String,
    pub doc_title: Option<String>,
    pub merge: MergeOutcome,
}

pub struct RefreshReport {
    pub feed_id: String,
    pub result: Result<FeedRefreshOutcome, RefreshError>,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub cache_max_age: Duration,
    pub timeout: Duration,
    /// Concurrent feed refreshes in `refresh_all`. Small on purpose: it
    /// bounds both bandwidth and the blast radius of a proxy-retry storm.
    pub concurrency: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            cache_max_age: Duration::from_secs(60 * 60),
            timeout: FETCH_TIMEOUT,
            concurrency: 8,
        }
    }
}

/// Owns the shared refresh state: proxy registry, rate limiter and the
/// response cache. The engine is the single writer for all three; readers
/// go through it, which keeps the locking story trivial.
pub struct RefreshEngine {
    registry: Mutex<ProxyRegistry>,
    limiter: Mutex<RateLimiter>,
    cache: Arc<Mutex<ResponseCache>>,
    fetcher: CachedFetcher,
    concurrency: usize,
}

impl RefreshEngine {
    pub fn new(client: reqwest::Client, registry: ProxyRegistry, options: EngineOptions) -> Self {
        let cache = Arc::new(Mutex::new(ResponseCache::new()));
        let fetcher = CachedFetcher::new(
            client,
            cache.clone(),
            options.timeout,
            options.cache_max_age,
        );
        Self {
            registry: Mutex::new(registry),
            limiter: Mutex::new(RateLimiter::new()),
            cache,
            fetcher,
            concurrency: options.concurrency.max(1),
        }
    }

    /// Restores persisted proxy statistics into the registry.
    pub async fn restore_scores(&self, state: &AppState) {
        self.registry
            .lock()
            .await
            .restore(&state.proxy_scores, state.proxy_scores_reset_at);
    }

    /// Writes the registry's statistics back into the state record.
    pub async fn export_scores(&self, state: &mut AppState) {
        let (scores, reset_at) = self.registry.lock().await.export();
        state.proxy_scores = scores;
        state.proxy_scores_reset_at = reset_at;
    }

    pub async fn load_cache(&self, map: BTreeMap<String, CacheRecord>) {
        self.cache.lock().await.load_map(map);
    }

    pub async fn snapshot_cache(&self) -> BTreeMap<String, CacheRecord> {
        self.cache.lock().await.to_map()
    }

    /// Drops the cache entry behind a removed feed's last fetch URL.
    pub async fn forget_url(&self, url: &str) {
        self.cache.lock().await.remove(url);
    }

    pub async fn clear_rate_limit(&self, feed_id: &str) {
        self.limiter.lock().await.clear(feed_id);
    }

    pub async fn rate_limit_remaining(&self, feed_id: &str) -> Option<Duration> {
        self.limiter.lock().await.active(feed_id)
    }

    /// Refreshes one feed and applies the outcome to the given state.
    pub async fn refresh_feed(
        &self,
        feed: &Subscription,
        state: &mut AppState,
        posts: &mut PostStore,
    ) -> Result<FeedRefreshOutcome, RefreshError> {
        let (parsed, url, via) = self.fetch_and_parse(feed).await?;
        Ok(apply_outcome(feed, parsed, url, via, state, posts))
    }

    /// Refreshes many feeds with bounded concurrency. Fetches run
    /// concurrently; outcomes are applied to the state sequentially
    /// afterwards (the per-feed merge is commutative, so completion order
    /// does not matter). One feed's failure never aborts the rest.
    /// Setting `cancel` stops new refreshes from starting; in-flight ones
    /// are bounded by their own timeouts.
    pub async fn refresh_all(
        &self,
        feeds: &[Subscription],
        state: &mut AppState,
        posts: &mut PostStore,
        cancel: Option<&AtomicBool>,
    ) -> Vec<RefreshReport> {
        if feeds.is_empty() {
            return Vec::new();
        }

        let fetched: Vec<(Subscription, Result<(ParsedFeed, String, String), RefreshError>)> =
            stream::iter(feeds.to_vec())
                .take_while(move |_| {
                    let stopped = cancel.is_some_and(|c| c.load(Ordering::Relaxed));
                    futures::future::ready(!stopped)
                })
                .map(|feed| async move {
                    let result = self.fetch_and_parse(&feed).await;
                    (feed, result)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        fetched
            .into_iter()
            .map(|(feed, result)| {
                let result = result.map(|(parsed, url, via)| {
                    apply_outcome(&feed, parsed, url, via, state, posts)
                });
                if let Err(e) = &result {
                    tracing::warn!(feed = %feed.url, error = %e, "Feed refresh failed");
                }
                RefreshReport {
                    feed_id: feed.id.clone(),
                    result,
                }
            })
            .collect()
    }

    /// The candidate ladder for one feed. Returns the parsed document,
    /// the URL that produced it and the candidate label.
    async fn fetch_and_parse(
        &self,
        feed: &Subscription,
    ) -> Result<(ParsedFeed, String, String), RefreshError> {
        if let Some(retry_in) = self.limiter.lock().await.active(&feed.id) {
            tracing::debug!(feed = %feed.url, retry_in_ms = retry_in.as_millis() as u64, "Skipping rate-limited feed");
            return Err(RefreshError::RateLimited { retry_in });
        }

        // Score snapshot; results recorded below never re-sort this list.
        let candidates = self.registry.lock().await.candidates();

        for candidate in &candidates {
            match self.try_candidate(feed, candidate).await {
                Ok((parsed, url)) => {
                    if let ProxyCandidate::Named(name) = candidate {
                        self.registry.lock().await.record_result(name, true);
                    }
                    self.limiter.lock().await.clear(&feed.id);
                    tracing::info!(feed = %feed.url, via = candidate.label(), "Feed fetched");
                    return Ok((parsed, url, candidate.label().to_string()));
                }
                Err(err) => {
                    tracing::debug!(
                        feed = %feed.url,
                        candidate = candidate.label(),
                        error = %err,
                        "Candidate failed"
                    );
                    if let ProxyCandidate::Named(name) = candidate {
                        let mut registry = self.registry.lock().await;
                        registry.record_result(name, false);
                        if err.disables_proxy() {
                            registry.disable(name);
                            tracing::warn!(proxy = %name, "Proxy placed on cooldown");
                        }
                    }
                }
            }
        }

        // Last resort: the feed's own URL, no proxy.
        match self.attempt(feed, &ProxyCandidate::Direct, false).await {
            Ok((parsed, url)) => {
                self.limiter.lock().await.clear(&feed.id);
                tracing::info!(feed = %feed.url, via = "direct", "Feed fetched");
                Ok((parsed, url, "direct".to_string()))
            }
            Err(err) => {
                if err.is_rate_limited() {
                    let retry_in = self.limiter.lock().await.apply_penalty(&feed.id);
                    tracing::warn!(feed = %feed.url, retry_in_ms = retry_in.as_millis() as u64, "Feed rate limited, backing off");
                    return Err(RefreshError::RateLimited { retry_in });
                }
                Err(RefreshError::Exhausted {
                    last: err.to_string(),
                })
            }
        }
    }

    /// One proxied candidate: a plain attempt, then a cache-busted retry
    /// for everything except timeouts.
    async fn try_candidate(
        &self,
        feed: &Subscription,
        candidate: &ProxyCandidate,
    ) -> Result<(ParsedFeed, String), CandidateError> {
        let first = match self.attempt(feed, candidate, false).await {
            Ok(ok) => return Ok(ok),
            Err(e) => e,
        };
        if first.skip_retry() {
            return Err(first);
        }
        self.attempt(feed, candidate, true).await
    }

    async fn attempt(
        &self,
        feed: &Subscription,
        candidate: &ProxyCandidate,
        cache_bust: bool,
    ) -> Result<(ParsedFeed, String), CandidateError> {
        let mut url = self.registry.lock().await.build_url(candidate, &feed.url);
        if cache_bust {
            let sep = if url.contains('?') { '&' } else { '?' };
            url.push(sep);
            url.push_str(&format!("_={}", now_ms()));
        }

        let record = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(CandidateError::Fetch)?;
        let parsed = parse_feed_text(&record.body, feed).map_err(CandidateError::Parse)?;
        Ok((parsed, url))
    }
}

/// Applies a successful refresh: bookkeeping, rate-limit reset, post merge
/// with flag preservation, and the document-title update.
fn apply_outcome(
    feed: &Subscription,
    parsed: ParsedFeed,
    fetched_url: String,
    via: String,
    state: &mut AppState,
    posts: &mut PostStore,
) -> FeedRefreshOutcome {
    let merge = posts.merge(parsed.posts, &state.read, &state.favorites);
    state.last_fetch.insert(feed.id.clone(), now_ms());
    state
        .last_fetch_url
        .insert(feed.id.clone(), fetched_url.clone());

    if let Some(title) = &parsed.title {
        if let Some(sub) = state.feed_mut(&feed.id) {
            if sub.title != *title {
                tracing::info!(feed = %feed.url, old = %sub.title, new = %title, "Feed title updated");
                sub.title = title.clone();
            }
        }
    }

    FeedRefreshOutcome {
        feed_id: feed.id.clone(),
        fetched_url,
        via,
        doc_title: parsed.title,
        merge,
    }
}
