use std::collections::HashMap;
use std::time::Duration;

use crate::util::now_ms;

/// Backoff constants mirror the upstream proxy behaviour: 30 s base,
/// doubling per consecutive penalty, capped at 15 minutes.
const BACKOFF_BASE_MS: i64 = 30_000;
const BACKOFF_MAX_MS: i64 = 900_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub attempt: u32,
    pub until_ms: i64,
    pub delay_ms: i64,
}

/// Per-feed exponential backoff, fed by HTTP 429 responses. A refresh must
/// consult [`RateLimiter::active`] before touching the network and skip
/// the feed while a window is open.
#[derive(Debug, Default)]
pub struct RateLimiter {
    entries: HashMap<String, RateLimitEntry>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a 429 for the feed and returns the delay before the next
    /// attempt is allowed. An expired entry restarts the progression from
    /// the base delay.
    pub fn apply_penalty(&mut self, feed_id: &str) -> Duration {
        self.apply_penalty_at(feed_id, now_ms())
    }

    pub fn apply_penalty_at(&mut self, feed_id: &str, now_ms: i64) -> Duration {
        let attempt = match self.entries.get(feed_id) {
            Some(entry) if entry.until_ms > now_ms => entry.attempt + 1,
            _ => 1,
        };
        let delay_ms = BACKOFF_BASE_MS
            .saturating_mul(1_i64 << (attempt - 1).min(20))
            .min(BACKOFF_MAX_MS);
        self.entries.insert(
            feed_id.to_string(),
            RateLimitEntry {
                attempt,
                until_ms: now_ms + delay_ms,
                delay_ms,
            },
        );
        Duration::from_millis(delay_ms as u64)
    }

    /// Remaining penalty window, if one is active. Expired entries are
    /// pruned on the way through.
    pub fn active(&mut self, feed_id: &str) -> Option<Duration> {
        self.active_at(feed_id, now_ms())
    }

    pub fn active_at(&mut self, feed_id: &str, now_ms: i64) -> Option<Duration> {
        match self.entries.get(feed_id) {
            Some(entry) if entry.until_ms > now_ms => {
                Some(Duration::from_millis((entry.until_ms - now_ms) as u64))
            }
            Some(_) => {
                self.entries.remove(feed_id);
                None
            }
            None => None,
        }
    }

    /// Called after any successful refresh; the next 429 starts over.
    pub fn clear(&mut self, feed_id: &str) {
        self.entries.remove(feed_id);
    }

    pub fn entry(&self, feed_id: &str) -> Option<&RateLimitEntry> {
        self.entries.get(feed_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_first_penalty_uses_base_delay() {
        let mut limiter = RateLimiter::new();
        let delay = limiter.apply_penalty_at("feed", NOW);
        assert_eq!(delay, Duration::from_millis(30_000));
        let entry = limiter.entry("feed").unwrap();
        assert_eq!(entry.attempt, 1);
        assert_eq!(entry.until_ms, NOW + 30_000);
    }

    #[test]
    fn test_consecutive_penalties_double_up_to_cap() {
        let mut limiter = RateLimiter::new();
        let mut now = NOW;
        let mut delays = Vec::new();
        for _ in 0..8 {
            let delay = limiter.apply_penalty_at("feed", now);
            delays.push(delay.as_millis() as i64);
            now += 1_000; // still inside the window
        }
        assert_eq!(&delays[..5], &[30_000, 60_000, 120_000, 240_000, 480_000]);
        assert!(delays.iter().all(|&d| d <= BACKOFF_MAX_MS));
        assert_eq!(*delays.last().unwrap(), BACKOFF_MAX_MS);
    }

    #[test]
    fn test_expired_entry_restarts_progression() {
        let mut limiter = RateLimiter::new();
        limiter.apply_penalty_at("feed", NOW);
        limiter.apply_penalty_at("feed", NOW + 1_000);
        let entry = limiter.entry("feed").unwrap();
        assert_eq!(entry.attempt, 2);

        // Far past the window: counter resets.
        let delay = limiter.apply_penalty_at("feed", NOW + 10 * BACKOFF_MAX_MS);
        assert_eq!(delay, Duration::from_millis(30_000));
        assert_eq!(limiter.entry("feed").unwrap().attempt, 1);
    }

    #[test]
    fn test_active_window_and_pruning() {
        let mut limiter = RateLimiter::new();
        limiter.apply_penalty_at("feed", NOW);

        let remaining = limiter.active_at("feed", NOW + 10_000).unwrap();
        assert_eq!(remaining, Duration::from_millis(20_000));

        assert!(limiter.active_at("feed", NOW + 30_000).is_none());
        // Pruned on the expired query.
        assert!(limiter.entry("feed").is_none());
    }

    #[test]
    fn test_clear_removes_entry() {
        let mut limiter = RateLimiter::new();
        limiter.apply_penalty_at("feed", NOW);
        limiter.clear("feed");
        assert!(limiter.active_at("feed", NOW + 1).is_none());
    }

    #[test]
    fn test_feeds_are_independent() {
        let mut limiter = RateLimiter::new();
        limiter.apply_penalty_at("a", NOW);
        assert!(limiter.active_at("b", NOW + 1).is_none());
    }

    proptest! {
        /// Consecutive penalties produce non-decreasing delays and never
        /// exceed the cap.
        #[test]
        fn prop_backoff_grows_to_cap(count in 1usize..20) {
            let mut limiter = RateLimiter::new();
            let mut now = NOW;
            let mut previous = 0_i64;
            for _ in 0..count {
                let delay = limiter.apply_penalty_at("feed", now).as_millis() as i64;
                prop_assert!(delay >= previous);
                prop_assert!(delay <= BACKOFF_MAX_MS);
                previous = delay;
                now += 1; // always inside the previous window
            }
        }
    }
}
