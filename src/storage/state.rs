//! The persisted state record.
//!
//! One JSON document holds every subscription, the per-feed fetch
//! bookkeeping, user settings, per-post flags and the proxy health
//! statistics. The camelCase key names are the contract with the
//! persistence collaborator and must not drift.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::util::feed_id;

/// One subscribed feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub category: String,
    /// Per-feed refresh override; the global setting applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_minutes: Option<u64>,
}

impl Subscription {
    pub fn new(url: &str, title: &str, category: &str) -> Self {
        Self {
            id: feed_id(url),
            url: url.trim().to_string(),
            title: title.to_string(),
            category: category.to_string(),
            refresh_minutes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub refresh_minutes: u64,
    pub cache_max_age_minutes: u64,
    /// Manual CORS proxy template; empty means unset.
    pub cors_proxy: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_minutes: 30,
            cache_max_age_minutes: 60,
            cors_proxy: String::new(),
        }
    }
}

/// Decayed proxy statistics as they appear in the persisted record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyScoreRecord {
    pub success: f64,
    pub fail: f64,
    pub last_success: i64,
    pub last_fail: i64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AppState {
    pub feeds: Vec<Subscription>,
    pub last_fetch: BTreeMap<String, i64>,
    /// Exact URL (proxy wrapping included) that produced the content
    /// currently considered current for each feed. Cache lookups after a
    /// restart must target this key.
    pub last_fetch_url: BTreeMap<String, String>,
    pub settings: Settings,
    pub read: BTreeMap<String, bool>,
    pub favorites: BTreeMap<String, bool>,
    pub tags: BTreeMap<String, Vec<String>>,
    pub proxy_scores: BTreeMap<String, ProxyScoreRecord>,
    pub proxy_scores_reset_at: i64,
}

impl AppState {
    /// Manual proxy template from settings, if one is configured.
    pub fn manual_proxy(&self) -> Option<String> {
        let template = self.settings.cors_proxy.trim();
        (!template.is_empty()).then(|| template.to_string())
    }

    /// Looks a feed up by id or URL.
    pub fn feed(&self, key: &str) -> Option<&Subscription> {
        self.feeds.iter().find(|f| f.id == key || f.url == key)
    }

    pub fn feed_mut(&mut self, key: &str) -> Option<&mut Subscription> {
        self.feeds.iter_mut().find(|f| f.id == key || f.url == key)
    }

    /// Adds a subscription unless the URL is already present. Returns the
    /// new feed id, or `None` for a duplicate.
    pub fn add_feed(&mut self, url: &str, title: &str, category: &str) -> Option<String> {
        let url = url.trim();
        if self.feeds.iter().any(|f| f.url == url) {
            return None;
        }
        let sub = Subscription::new(url, title, category);
        let id = sub.id.clone();
        self.feeds.push(sub);
        Some(id)
    }

    /// Merges an imported subscription list, de-duplicating by URL.
    /// Returns the number of feeds actually added.
    pub fn merge_feeds(&mut self, incoming: Vec<Subscription>) -> usize {
        let mut added = 0;
        for sub in incoming {
            if self.feeds.iter().any(|f| f.url == sub.url) {
                continue;
            }
            self.feeds.push(sub);
            added += 1;
        }
        added
    }

    /// Removes a feed (by id or URL) together with its fetch bookkeeping.
    /// Post flags are cleared separately via [`AppState::forget_posts`]
    /// once the post store has reported which post ids went away.
    pub fn remove_feed(&mut self, key: &str) -> Option<Subscription> {
        let idx = self.feeds.iter().position(|f| f.id == key || f.url == key)?;
        let feed = self.feeds.remove(idx);
        self.last_fetch.remove(&feed.id);
        self.last_fetch_url.remove(&feed.id);
        Some(feed)
    }

    /// Drops read/favorite/tag entries for posts that no longer exist.
    pub fn forget_posts(&mut self, post_ids: &[String]) {
        for id in post_ids {
            self.read.remove(id);
            self.favorites.remove(id);
            self.tags.remove(id);
        }
    }

    /// Effective refresh interval for a feed, in minutes.
    pub fn refresh_interval_minutes(&self, feed: &Subscription) -> u64 {
        feed.refresh_minutes
            .unwrap_or(self.settings.refresh_minutes)
            .max(1)
    }
}
