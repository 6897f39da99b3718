//! Background TTL sweeper
//!
//! One task per [`CacheDirectory`]. Wakes on a fixed interval and deletes
//! expired keys from every cache; sweep problems are logged and never stop
//! the loop.

use crate::cache::CacheDirectory;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Spawn the sweeper for a cache directory. Cancel the token to stop it.
pub fn spawn_sweeper(dir: Arc<CacheDirectory>, shutdown: CancellationToken) -> JoinHandle<()> {
    let interval = dir.sweep_interval();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick would sweep an empty directory.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Cache sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let dir = dir.clone();
                    // A panicking sweep must not take the loop down with it.
                    let swept = tokio::spawn(async move { dir.sweep_expired().await }).await;
                    match swept {
                        Ok(removed) if removed > 0 => {
                            debug!(removed, "Cache sweep complete");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "Cache sweep failed");
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sweeper_evicts_expired_keys() {
        let dir = CacheDirectory::new(CacheConfig {
            default_ttl: Duration::from_secs(0),
            sweep_interval: Duration::from_millis(200),
        });
        dir.setup("facts", None);
        dir.write("facts", "stale", json!(1)).await.unwrap();

        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(dir.clone(), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        // The key is gone entirely, not merely expired.
        assert!(!dir.evict("facts", "stale").unwrap());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let dir = CacheDirectory::new(CacheConfig::default());
        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(dir, shutdown.clone());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
