//! Network plumbing: the cache-aware fetcher and the per-feed rate
//! limiter that throttles feeds returning HTTP 429.

mod cache;
mod fetcher;
mod rate_limit;

pub use cache::{CacheRecord, ResponseCache};
pub use fetcher::{CachedFetcher, FetchError, FETCH_TIMEOUT};
pub use rate_limit::{RateLimitEntry, RateLimiter};
