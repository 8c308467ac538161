use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use serde::{Deserialize, Serialize};

/// Most entries are a few KB of XML; 512 bounds worst-case memory while
/// keeping any realistic subscription list fully cached.
const CACHE_CAPACITY: usize = 512;

/// One cached HTTP response, keyed by the exact request URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub stored_at_ms: i64,
}

impl CacheRecord {
    pub fn age(&self, now_ms: i64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.stored_at_ms).max(0) as u64)
    }
}

/// LRU-bounded response cache. Stale entries are deliberately retained
/// (the fetcher serves them as last-known-good content when a live fetch
/// fails), so eviction happens only by capacity, never by age.
pub struct ResponseCache {
    entries: LruCache<String, CacheRecord>,
}

impl ResponseCache {
    pub fn new() -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).expect("cache capacity is nonzero");
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Entry for `url` if it is younger than `max_age`.
    pub fn fresh(&mut self, url: &str, max_age: Duration, now_ms: i64) -> Option<CacheRecord> {
        let record = self.entries.get(url)?;
        (record.age(now_ms) < max_age).then(|| record.clone())
    }

    /// Entry for `url` regardless of age.
    pub fn any(&mut self, url: &str) -> Option<CacheRecord> {
        self.entries.get(url).cloned()
    }

    pub fn insert(&mut self, url: &str, record: CacheRecord) {
        self.entries.put(url.to_string(), record);
    }

    pub fn remove(&mut self, url: &str) {
        self.entries.pop(url);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot for persistence.
    pub fn to_map(&self) -> BTreeMap<String, CacheRecord> {
        self.entries
            .iter()
            .map(|(url, record)| (url.clone(), record.clone()))
            .collect()
    }

    pub fn load_map(&mut self, map: BTreeMap<String, CacheRecord>) {
        for (url, record) in map {
            self.entries.put(url, record);
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}
