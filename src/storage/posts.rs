use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::feed::media::MediaEntry;

/// One normalized feed entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub feed_id: String,
    pub title: String,
    pub link: String,
    pub content: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<i64>,
    #[serde(default)]
    pub media: Vec<MediaEntry>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub favorite: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub inserted: usize,
    pub updated: usize,
}

/// In-memory post collection keyed by post id, persisted as its own JSON
/// document. Content fields are always refreshed from the feed; `read`
/// and `favorite` are user state and survive every merge.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostStore {
    posts: BTreeMap<String, Post>,
}

impl PostStore {
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Post> {
        self.posts.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Post> {
        self.posts.values()
    }

    /// Posts for one feed, newest first.
    pub fn for_feed(&self, feed_id: &str) -> Vec<&Post> {
        let mut posts: Vec<&Post> = self
            .posts
            .values()
            .filter(|p| p.feed_id == feed_id)
            .collect();
        posts.sort_by(|a, b| b.published.cmp(&a.published).then(a.title.cmp(&b.title)));
        posts
    }

    /// Merges freshly parsed posts. Existing posts keep their `read` and
    /// `favorite` flags; new posts pick flags up from the persisted flag
    /// maps, so user state survives even when the post document itself was
    /// lost between runs.
    pub fn merge(
        &mut self,
        incoming: Vec<Post>,
        read: &BTreeMap<String, bool>,
        favorites: &BTreeMap<String, bool>,
    ) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for mut post in incoming {
            match self.posts.get_mut(&post.id) {
                Some(existing) => {
                    post.read = existing.read;
                    post.favorite = existing.favorite;
                    if *existing != post {
                        *existing = post;
                        outcome.updated += 1;
                    }
                }
                None => {
                    post.read = read.get(&post.id).copied().unwrap_or(false);
                    post.favorite = favorites.get(&post.id).copied().unwrap_or(false);
                    self.posts.insert(post.id.clone(), post);
                    outcome.inserted += 1;
                }
            }
        }
        outcome
    }

    /// Drops every post belonging to a feed, returning the removed ids so
    /// the caller can clear their flag entries.
    pub fn remove_feed(&mut self, feed_id: &str) -> Vec<String> {
        let removed: Vec<String> = self
            .posts
            .values()
            .filter(|p| p.feed_id == feed_id)
            .map(|p| p.id.clone())
            .collect();
        for id in &removed {
            self.posts.remove(id);
        }
        removed
    }

    pub fn set_read(&mut self, id: &str, read: bool) -> bool {
        match self.posts.get_mut(id) {
            Some(post) => {
                post.read = read;
                true
            }
            None => false,
        }
    }

    pub fn set_favorite(&mut self, id: &str, favorite: bool) -> bool {
        match self.posts.get_mut(id) {
            Some(post) => {
                post.favorite = favorite;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn post(id: &str, feed: &str, title: &str) -> Post {
        Post {
            id: id.to_string(),
            feed_id: feed.to_string(),
            title: title.to_string(),
            link: format!("https://example.com/{id}"),
            content: "body".to_string(),
            summary: "summary".to_string(),
            published: Some(1_700_000_000_000),
            media: Vec::new(),
            images: Vec::new(),
            read: false,
            favorite: false,
        }
    }

    #[test]
    fn test_merge_inserts_new_posts() {
        let mut store = PostStore::default();
        let outcome = store.merge(
            vec![post("p1", "f1", "One"), post("p2", "f1", "Two")],
            &BTreeMap::new(),
            &BTreeMap::new(),
        );
        assert_eq!(outcome, MergeOutcome { inserted: 2, updated: 0 });
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_merge_preserves_flags_on_existing_posts() {
        let mut store = PostStore::default();
        store.merge(
            vec![post("p1", "f1", "One")],
            &BTreeMap::new(),
            &BTreeMap::new(),
        );
        store.set_read("p1", true);
        store.set_favorite("p1", true);

        // Same post arrives again with updated content.
        let mut updated = post("p1", "f1", "One (edited)");
        updated.content = "new body".to_string();
        let outcome = store.merge(vec![updated], &BTreeMap::new(), &BTreeMap::new());

        assert_eq!(outcome, MergeOutcome { inserted: 0, updated: 1 });
        let merged = store.get("p1").unwrap();
        assert_eq!(merged.title, "One (edited)");
        assert_eq!(merged.content, "new body");
        assert!(merged.read);
        assert!(merged.favorite);
    }

    #[test]
    fn test_merge_identical_content_is_idempotent() {
        let mut store = PostStore::default();
        store.merge(
            vec![post("p1", "f1", "One")],
            &BTreeMap::new(),
            &BTreeMap::new(),
        );
        let outcome = store.merge(
            vec![post("p1", "f1", "One")],
            &BTreeMap::new(),
            &BTreeMap::new(),
        );
        assert_eq!(outcome, MergeOutcome::default());
    }

    #[test]
    fn test_merge_restores_flags_from_maps_for_new_posts() {
        let mut store = PostStore::default();
        let mut read = BTreeMap::new();
        read.insert("p1".to_string(), true);
        let mut favorites = BTreeMap::new();
        favorites.insert("p1".to_string(), true);

        store.merge(vec![post("p1", "f1", "One")], &read, &favorites);
        let merged = store.get("p1").unwrap();
        assert!(merged.read);
        assert!(merged.favorite);
    }

    #[test]
    fn test_remove_feed_cascades() {
        let mut store = PostStore::default();
        store.merge(
            vec![
                post("p1", "f1", "One"),
                post("p2", "f1", "Two"),
                post("p3", "f2", "Other"),
            ],
            &BTreeMap::new(),
            &BTreeMap::new(),
        );

        let mut removed = store.remove_feed("f1");
        removed.sort();
        assert_eq!(removed, vec!["p1".to_string(), "p2".to_string()]);
        assert_eq!(store.len(), 1);
        assert!(store.get("p3").is_some());
    }

    #[test]
    fn test_for_feed_sorted_newest_first() {
        let mut store = PostStore::default();
        let mut older = post("p1", "f1", "Old");
        older.published = Some(1_000);
        let mut newer = post("p2", "f1", "New");
        newer.published = Some(2_000);
        store.merge(vec![older, newer], &BTreeMap::new(), &BTreeMap::new());

        let posts = store.for_feed("f1");
        assert_eq!(posts[0].id, "p2");
        assert_eq!(posts[1].id, "p1");
    }
}
