use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use feedcycle::app::App;
use feedcycle::config::Config;
use feedcycle::feed::{scheduler, RefreshError, RefreshReport};

#[derive(Parser)]
#[command(name = "feedcycle", version, about = "Feed reader sync engine")]
struct Cli {
    /// Path to the config file (default: ~/.config/feedcycle/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Subscribe to a feed
    Add {
        url: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Unsubscribe from a feed (by id or URL)
    Rm { feed: String },
    /// Edit a subscription
    Edit {
        feed: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// Per-feed refresh interval in minutes (0 clears the override)
        #[arg(long)]
        refresh_minutes: Option<u64>,
    },
    /// List subscriptions
    List,
    /// List posts, optionally for one feed
    Posts {
        feed: Option<String>,
        #[arg(long)]
        unread: bool,
    },
    /// Import subscriptions from an OPML file
    Import { path: PathBuf },
    /// Export subscriptions to an OPML file
    Export { path: PathBuf },
    /// Refresh one feed, or all of them
    Refresh { feed: Option<String> },
    /// Run the refresh loop until interrupted
    Watch,
    /// Mark a post read (or unread with --unread)
    MarkRead {
        post: String,
        #[arg(long)]
        unread: bool,
    },
    /// Toggle a post's favorite flag
    Fav {
        post: String,
        #[arg(long)]
        remove: bool,
    },
    /// Replace a post's tags (no tags clears them)
    Tag {
        post: String,
        tags: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("feedcycle=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let config = Config::load(&config_path).context("Failed to load configuration")?;
    let mut app = App::load(&config).await.context("Failed to open data store")?;

    match cli.command {
        Command::Add {
            url,
            title,
            category,
        } => {
            let id = app.add_feed(&url, title.as_deref(), category.as_deref())?;
            app.save().await?;
            println!("Subscribed {id}  {url}");
        }
        Command::Rm { feed } => {
            let removed = app.remove_feed(&feed).await?;
            app.save().await?;
            println!("Removed {}  {}", removed.id, removed.url);
        }
        Command::Edit {
            feed,
            title,
            url,
            category,
            refresh_minutes,
        } => {
            app.edit_feed(
                &feed,
                title.as_deref(),
                url.as_deref(),
                category.as_deref(),
                refresh_minutes,
            )?;
            app.save().await?;
            println!("Updated {feed}");
        }
        Command::List => {
            for feed in &app.state.feeds {
                let category = if feed.category.is_empty() {
                    String::new()
                } else {
                    format!("  [{}]", feed.category)
                };
                println!("{}  {}{}  {}", feed.id, feed.title, category, feed.url);
            }
        }
        Command::Posts { feed, unread } => {
            let feed_id = match &feed {
                Some(key) => Some(
                    app.state
                        .feed(key)
                        .with_context(|| format!("No such feed: {key}"))?
                        .id
                        .clone(),
                ),
                None => None,
            };
            for post in app.posts.iter() {
                if let Some(feed_id) = &feed_id {
                    if &post.feed_id != feed_id {
                        continue;
                    }
                }
                if unread && post.read {
                    continue;
                }
                let marks = format!(
                    "{}{}",
                    if post.read { " " } else { "*" },
                    if post.favorite { "♥" } else { " " }
                );
                println!("{} {}  {}  {}", marks, post.id, post.title, post.link);
            }
        }
        Command::Import { path } => {
            let added = app.import_opml(&path).await?;
            app.save().await?;
            println!("Imported {added} new feeds");
        }
        Command::Export { path } => {
            app.export_opml(&path)?;
            println!("Exported {} feeds to {}", app.state.feeds.len(), path.display());
        }
        Command::Refresh { feed } => match feed {
            Some(key) => {
                let outcome = app.refresh_one(&key).await?;
                print_refresh_result(&key, &outcome);
            }
            None => {
                let reports = app.refresh_all(None).await?;
                for RefreshReport { feed_id, result } in &reports {
                    print_refresh_result(feed_id, result);
                }
            }
        },
        Command::Watch => {
            println!("Refreshing on schedule; Ctrl-C to stop.");
            let handle = scheduler::spawn(app);
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            let mut app = handle.stop().await?;
            app.save().await?;
        }
        Command::MarkRead { post, unread } => {
            app.mark_read(&post, !unread)?;
            app.save().await?;
        }
        Command::Fav { post, remove } => {
            app.set_favorite(&post, !remove)?;
            app.save().await?;
        }
        Command::Tag { post, tags } => {
            app.set_tags(&post, tags)?;
            app.save().await?;
        }
    }

    Ok(())
}

fn print_refresh_result(
    feed_id: &str,
    result: &Result<feedcycle::feed::FeedRefreshOutcome, RefreshError>,
) {
    match result {
        Ok(outcome) => println!(
            "ok   {feed_id}  via {}  +{} new, {} updated",
            outcome.via, outcome.merge.inserted, outcome.merge.updated
        ),
        Err(RefreshError::RateLimited { retry_in }) => {
            println!("wait {feed_id}  rate limited, retry in {}s", retry_in.as_secs());
        }
        Err(e) => println!("fail {feed_id}  {e}"),
    }
}
