//! Shared utilities: stable id hashing, URL safety checks, and the XML
//! element tree the feed and OPML parsers are built on.

mod hash;
pub mod url_guard;
pub mod xml;

pub use hash::{feed_id, post_id, stable_hash};
pub use url_guard::{safe_media_url, validate_feed_url, UrlGuardError};

use chrono::Utc;

/// Wall-clock epoch milliseconds. Persisted timestamps must stay
/// meaningful across restarts, so this is deliberately not monotonic;
/// consumers clamp negative elapsed time instead.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
