//! Application glue: owns the store, the state record, the post store and
//! the refresh engine, and exposes the operations the CLI drives.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::feed::opml::{self, OpmlOutline};
use crate::feed::{EngineOptions, FeedRefreshOutcome, RefreshEngine, RefreshError, RefreshReport};
use crate::fetch::CacheRecord;
use crate::proxy::ProxyRegistry;
use crate::storage::{AppState, JsonStore, PostStore, Subscription};
use crate::util::{now_ms, validate_feed_url};

const STATE_KEY: &str = "state";
const POSTS_KEY: &str = "posts";
const CACHE_KEY: &str = "http_cache";

pub struct App {
    store: JsonStore,
    pub state: AppState,
    pub posts: PostStore,
    engine: RefreshEngine,
}

impl App {
    pub async fn load(config: &Config) -> Result<App> {
        let store = JsonStore::open(config.data_dir()?)?;

        let state: AppState = match store.get(STATE_KEY).await? {
            Some(state) => state,
            None => {
                // First run: seed the record's settings from the config file.
                let mut state = AppState::default();
                state.settings.refresh_minutes = config.refresh_minutes;
                state.settings.cache_max_age_minutes = config.cache_max_age_minutes;
                state.settings.cors_proxy = config.cors_proxy.clone().unwrap_or_default();
                state
            }
        };
        let posts: PostStore = store.get(POSTS_KEY).await?.unwrap_or_default();

        let registry = ProxyRegistry::new(state.manual_proxy());
        let engine = RefreshEngine::new(
            reqwest::Client::new(),
            registry,
            EngineOptions {
                cache_max_age: Duration::from_secs(state.settings.cache_max_age_minutes * 60),
                timeout: Duration::from_secs(config.fetch_timeout_secs.max(1)),
                concurrency: config.max_concurrent_refreshes,
            },
        );
        engine.restore_scores(&state).await;

        if let Some(cache) = store
            .get::<BTreeMap<String, CacheRecord>>(CACHE_KEY)
            .await?
        {
            engine.load_cache(cache).await;
        }

        Ok(App {
            store,
            state,
            posts,
            engine,
        })
    }

    /// Persists the state record, the post document and the cache snapshot.
    pub async fn save(&mut self) -> Result<()> {
        self.engine.export_scores(&mut self.state).await;
        self.store.put(STATE_KEY, &self.state).await?;
        self.store.put(POSTS_KEY, &self.posts).await?;
        self.store
            .put(CACHE_KEY, &self.engine.snapshot_cache().await)
            .await?;
        Ok(())
    }

    pub fn add_feed(
        &mut self,
        url: &str,
        title: Option<&str>,
        category: Option<&str>,
    ) -> Result<String> {
        validate_feed_url(url)?;
        match self
            .state
            .add_feed(url, title.unwrap_or(url), category.unwrap_or(""))
        {
            Some(id) => Ok(id),
            None => bail!("Already subscribed: {url}"),
        }
    }

    pub fn edit_feed(
        &mut self,
        key: &str,
        title: Option<&str>,
        url: Option<&str>,
        category: Option<&str>,
        refresh_minutes: Option<u64>,
    ) -> Result<()> {
        if let Some(url) = url {
            validate_feed_url(url)?;
            if self.state.feeds.iter().any(|f| f.url == url && f.id != key) {
                bail!("Another subscription already uses {url}");
            }
        }
        let feed = self.state.feed_mut(key).context("No such feed")?;
        if let Some(title) = title {
            feed.title = title.to_string();
        }
        if let Some(url) = url {
            // The id stays: it anchors posts, flags and bookkeeping.
            feed.url = url.to_string();
        }
        if let Some(category) = category {
            feed.category = category.to_string();
        }
        if refresh_minutes.is_some() {
            feed.refresh_minutes = refresh_minutes.filter(|m| *m > 0);
        }
        Ok(())
    }

    /// Removes a feed and cascades: posts, their flags/tags, the fetch
    /// bookkeeping and the cache entry behind the last fetch URL.
    pub async fn remove_feed(&mut self, key: &str) -> Result<Subscription> {
        let last_url = self
            .state
            .feed(key)
            .and_then(|f| self.state.last_fetch_url.get(&f.id).cloned());

        let feed = self.state.remove_feed(key).context("No such feed")?;
        let removed_posts = self.posts.remove_feed(&feed.id);
        self.state.forget_posts(&removed_posts);
        self.engine.clear_rate_limit(&feed.id).await;
        if let Some(url) = last_url {
            self.engine.forget_url(&url).await;
        }
        tracing::info!(feed = %feed.url, posts = removed_posts.len(), "Feed removed");
        Ok(feed)
    }

    /// Imports an OPML file, de-duplicating by URL. Returns the number of
    /// feeds added.
    pub async fn import_opml(&mut self, path: &std::path::Path) -> Result<usize> {
        let outlines = opml::parse_file(path).await?;
        Ok(self.merge_outlines(outlines))
    }

    pub fn merge_outlines(&mut self, outlines: Vec<OpmlOutline>) -> usize {
        let incoming = outlines
            .into_iter()
            .map(OpmlOutline::into_subscription)
            .collect();
        self.state.merge_feeds(incoming)
    }

    pub fn export_opml(&self, path: &std::path::Path) -> Result<()> {
        opml::export_to_file(&self.state.feeds, path)
    }

    /// Feeds whose refresh interval has elapsed.
    pub fn due_feeds(&self) -> Vec<Subscription> {
        let now = now_ms();
        self.state
            .feeds
            .iter()
            .filter(|feed| {
                let interval_ms =
                    self.state.refresh_interval_minutes(feed) as i64 * 60_000;
                match self.state.last_fetch.get(&feed.id) {
                    Some(last) => now.saturating_sub(*last) >= interval_ms,
                    None => true,
                }
            })
            .cloned()
            .collect()
    }

    /// Refreshes the given feeds and persists the results.
    pub async fn refresh_feeds(
        &mut self,
        feeds: &[Subscription],
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<RefreshReport>> {
        let reports = self
            .engine
            .refresh_all(feeds, &mut self.state, &mut self.posts, cancel)
            .await;
        self.save().await?;
        Ok(reports)
    }

    pub async fn refresh_all(
        &mut self,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<RefreshReport>> {
        let feeds = self.state.feeds.clone();
        self.refresh_feeds(&feeds, cancel).await
    }

    pub async fn refresh_one(
        &mut self,
        key: &str,
    ) -> Result<Result<FeedRefreshOutcome, RefreshError>> {
        let feed = self.state.feed(key).context("No such feed")?.clone();
        let outcome = self
            .engine
            .refresh_feed(&feed, &mut self.state, &mut self.posts)
            .await;
        self.save().await?;
        Ok(outcome)
    }

    pub fn mark_read(&mut self, post_id: &str, read: bool) -> Result<()> {
        if !self.posts.set_read(post_id, read) {
            bail!("No such post: {post_id}");
        }
        if read {
            self.state.read.insert(post_id.to_string(), true);
        } else {
            self.state.read.remove(post_id);
        }
        Ok(())
    }

    pub fn set_favorite(&mut self, post_id: &str, favorite: bool) -> Result<()> {
        if !self.posts.set_favorite(post_id, favorite) {
            bail!("No such post: {post_id}");
        }
        if favorite {
            self.state.favorites.insert(post_id.to_string(), true);
        } else {
            self.state.favorites.remove(post_id);
        }
        Ok(())
    }

    pub fn set_tags(&mut self, post_id: &str, tags: Vec<String>) -> Result<()> {
        if self.posts.get(post_id).is_none() {
            bail!("No such post: {post_id}");
        }
        if tags.is_empty() {
            self.state.tags.remove(post_id);
        } else {
            self.state.tags.insert(post_id.to_string(), tags);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(name: &str) -> Config {
        let dir = std::env::temp_dir().join(format!("feedcycle_app_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        Config {
            data_dir: Some(dir),
            ..Config::default()
        }
    }

    fn cleanup(config: &Config) {
        if let Some(dir) = &config.data_dir {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[tokio::test]
    async fn test_add_list_remove_feed() {
        let config = test_config("add_remove");
        let mut app = App::load(&config).await.unwrap();

        let id = app
            .add_feed("https://example.com/rss.xml", Some("Example"), None)
            .unwrap();
        assert_eq!(app.state.feeds.len(), 1);
        assert!(app
            .add_feed("https://example.com/rss.xml", None, None)
            .is_err());

        let removed = app.remove_feed(&id).await.unwrap();
        assert_eq!(removed.url, "https://example.com/rss.xml");
        assert!(app.state.feeds.is_empty());
        cleanup(&config);
    }

    #[tokio::test]
    async fn test_add_feed_validates_url() {
        let config = test_config("validate");
        let mut app = App::load(&config).await.unwrap();
        assert!(app.add_feed("http://127.0.0.1/rss", None, None).is_err());
        assert!(app.add_feed("ftp://example.com/rss", None, None).is_err());
        cleanup(&config);
    }

    #[tokio::test]
    async fn test_state_survives_reload() {
        let config = test_config("reload");
        {
            let mut app = App::load(&config).await.unwrap();
            app.add_feed("https://example.com/rss.xml", Some("Example"), Some("news"))
                .unwrap();
            app.save().await.unwrap();
        }
        {
            let app = App::load(&config).await.unwrap();
            assert_eq!(app.state.feeds.len(), 1);
            assert_eq!(app.state.feeds[0].title, "Example");
            assert_eq!(app.state.feeds[0].category, "news");
        }
        cleanup(&config);
    }

    #[tokio::test]
    async fn test_first_run_seeds_settings_from_config() {
        let mut config = test_config("seed");
        config.refresh_minutes = 7;
        config.cors_proxy = Some("https://proxy.example.com/?url=".to_string());

        let app = App::load(&config).await.unwrap();
        assert_eq!(app.state.settings.refresh_minutes, 7);
        assert_eq!(
            app.state.manual_proxy().as_deref(),
            Some("https://proxy.example.com/?url=")
        );
        cleanup(&config);
    }

    #[tokio::test]
    async fn test_due_feeds() {
        let config = test_config("due");
        let mut app = App::load(&config).await.unwrap();
        let id = app
            .add_feed("https://example.com/rss.xml", None, None)
            .unwrap();

        // Never fetched: due immediately.
        assert_eq!(app.due_feeds().len(), 1);

        app.state.last_fetch.insert(id.clone(), now_ms());
        assert!(app.due_feeds().is_empty());

        // Last fetch far in the past: due again.
        app.state.last_fetch.insert(id, now_ms() - 31 * 60_000);
        assert_eq!(app.due_feeds().len(), 1);
        cleanup(&config);
    }

    #[tokio::test]
    async fn test_edit_feed() {
        let config = test_config("edit");
        let mut app = App::load(&config).await.unwrap();
        let id = app
            .add_feed("https://example.com/rss.xml", Some("Old"), None)
            .unwrap();

        app.edit_feed(&id, Some("New"), None, Some("tech"), Some(5))
            .unwrap();
        let feed = app.state.feed(&id).unwrap();
        assert_eq!(feed.title, "New");
        assert_eq!(feed.category, "tech");
        assert_eq!(feed.refresh_minutes, Some(5));

        assert!(app.edit_feed("nope", None, None, None, None).is_err());
        cleanup(&config);
    }
}
