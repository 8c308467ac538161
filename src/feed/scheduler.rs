//! Interval refresh loop.
//!
//! Ticks once a minute, refreshes whichever feeds are due, and shuts down
//! cleanly on request: the cancel flag stops new per-feed refreshes from
//! starting, in-flight requests drain under their own timeouts, and
//! `stop()` hands the application state back to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::app::App;

/// How often the loop checks for due feeds. Per-feed cadence comes from
/// the subscription's own refresh interval, not from this tick.
const TICK: Duration = Duration::from_secs(60);

pub struct SchedulerHandle {
    cancel_tx: broadcast::Sender<()>,
    stop_flag: Arc<AtomicBool>,
    join: JoinHandle<App>,
}

impl SchedulerHandle {
    /// Stops starting new feed refreshes, waits for the loop to wind
    /// down, and returns the application state for a final save.
    pub async fn stop(self) -> Result<App> {
        self.stop_flag.store(true, Ordering::Relaxed);
        let _ = self.cancel_tx.send(());
        Ok(self.join.await?)
    }
}

/// Spawns the refresh loop. An immediate first pass picks up feeds that
/// came due while the process was not running.
pub fn spawn(mut app: App) -> SchedulerHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let stop_flag = Arc::new(AtomicBool::new(false));
    let flag = stop_flag.clone();

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    tracing::info!("Refresh loop shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    let due = app.due_feeds();
                    if due.is_empty() {
                        continue;
                    }
                    tracing::info!(count = due.len(), "Refreshing due feeds");
                    match app.refresh_feeds(&due, Some(flag.as_ref())).await {
                        Ok(reports) => {
                            let failed = reports.iter().filter(|r| r.result.is_err()).count();
                            if failed > 0 {
                                tracing::warn!(failed, total = reports.len(), "Some feeds failed to refresh");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Refresh cycle could not persist");
                        }
                    }
                }
            }
        }
        app
    });

    SchedulerHandle {
        cancel_tx,
        stop_flag,
        join,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_spawn_and_stop_returns_app() {
        let dir = std::env::temp_dir().join("feedcycle_scheduler_test");
        let _ = std::fs::remove_dir_all(&dir);
        let config = Config {
            data_dir: Some(dir.clone()),
            ..Config::default()
        };
        let app = App::load(&config).await.unwrap();

        let handle = spawn(app);
        // Give the first tick a chance to run against an empty feed list.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let app = handle.stop().await.unwrap();
        assert!(app.state.feeds.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
