//! Per-account context
//!
//! Everything keyed by the signed-in user lives here: the in-memory feeds,
//! the feed snapshot cache and the search history. It is built at login and
//! torn down at logout; nothing user-scoped is held in process globals.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::data::{BoundedFeedCache, FeedKind, SearchHistoryCache, UserId};
use crate::service::{FeedClient, FeedStore};

/// Signed-in account state
pub struct AccountSession {
    user: UserId,
    feeds: Arc<FeedStore>,
    feed_cache: BoundedFeedCache,
    search_history: SearchHistoryCache,
    shutdown: watch::Sender<bool>,
    writers: Vec<JoinHandle<()>>,
}

impl AccountSession {
    /// Build the context for `user` and warm-start every feed from cache
    ///
    /// One writer task per feed kind snapshots the published list once it
    /// has been quiet for `cache.snapshot_debounce_ms`.
    pub async fn login(user: UserId, client: Arc<dyn FeedClient>, config: &AppConfig) -> Self {
        let feeds = Arc::new(FeedStore::new(client));
        let feed_cache =
            BoundedFeedCache::with_max_items(&config.cache.directory, config.cache.max_items);
        let search_history = SearchHistoryCache::new(&config.cache.documents_directory, &user);

        let mut restored = 0;
        for kind in FeedKind::ALL {
            restored += feeds.warm_start(kind, &feed_cache, &user).await;
        }

        let debounce = config.cache.snapshot_debounce();
        let (shutdown, _) = watch::channel(false);
        let writers = FeedKind::ALL
            .into_iter()
            .map(|kind| {
                spawn_cache_writer(
                    kind,
                    Arc::clone(&feeds),
                    feed_cache.clone(),
                    user.clone(),
                    debounce,
                    shutdown.subscribe(),
                )
            })
            .collect();

        tracing::info!(user_id = %user, restored, "Account session started");

        Self {
            user,
            feeds,
            feed_cache,
            search_history,
            shutdown,
            writers,
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn feeds(&self) -> &Arc<FeedStore> {
        &self.feeds
    }

    pub fn feed_cache(&self) -> &BoundedFeedCache {
        &self.feed_cache
    }

    pub fn search_history(&self) -> &SearchHistoryCache {
        &self.search_history
    }

    /// Snapshot every feed now, bypassing the debounce
    pub async fn flush(&self) {
        for kind in FeedKind::ALL {
            self.feeds
                .persist_snapshot(kind, &self.feed_cache, &self.user)
                .await;
        }
    }

    /// Stop the cache writers and drop every cached feed of this user
    pub async fn logout(mut self) {
        // Writers finish an in-progress snapshot before stopping
        self.shutdown.send_replace(true);
        for writer in self.writers.drain(..) {
            if let Err(error) = writer.await {
                tracing::warn!(%error, user_id = %self.user, "Cache writer ended abnormally");
            }
        }

        for kind in FeedKind::ALL {
            self.feed_cache.invalidate(kind, &self.user).await;
        }

        tracing::info!(user_id = %self.user, "Account session ended");
    }
}

impl Drop for AccountSession {
    fn drop(&mut self) {
        for writer in &self.writers {
            writer.abort();
        }
    }
}

fn spawn_cache_writer(
    kind: FeedKind,
    feeds: Arc<FeedStore>,
    cache: BoundedFeedCache,
    user: UserId,
    debounce: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut records = feeds.records(kind);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = records.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }

            // Wait for a quiet period so bursts of updates write once
            loop {
                tokio::select! {
                    quiet = tokio::time::timeout(debounce, records.changed()) => match quiet {
                        Ok(Ok(())) => continue,
                        Ok(Err(_)) => return,
                        Err(_) => break,
                    },
                    _ = shutdown.changed() => return,
                }
            }

            feeds.persist_snapshot(kind, &cache, &user).await;
        }
        tracing::debug!(kind = %kind, user_id = %user, "Cache writer stopped");
    })
}
