//! File-backed caches
//!
//! Both caches are optimizations: every read or write failure is logged and
//! degrades to an empty result or a dropped write. Nothing here returns an
//! error to the caller.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::models::{FeedKind, SearchHistoryItem, SearchHistoryValue, UserId};
use crate::error::CacheError;
use crate::metrics::{CACHE_READS_TOTAL, CACHE_WRITES_TOTAL};

/// Default number of entries kept per feed snapshot
pub const DEFAULT_MAX_ITEMS: usize = 100;

// =============================================================================
// Shared file helpers
// =============================================================================

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CacheError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Write through a sibling temp file so readers never see a torn file.
async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec(value)?;
    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    tokio::fs::write(&temp_path, &bytes).await?;
    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}

/// File-name-safe key for a user id
fn user_key(user: &UserId) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(user.as_str().as_bytes()))
}

async fn remove_if_present(path: &Path) -> Result<bool, CacheError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error.into()),
    }
}

// =============================================================================
// Bounded feed cache
// =============================================================================

/// Size-capped snapshot cache for feeds, one JSON file per (kind, user)
///
/// The file holds a JSON array of wire entities in the order they were
/// given. Callers pass newest-first lists; the cache keeps the first
/// `max_items` without re-sorting.
#[derive(Debug, Clone)]
pub struct BoundedFeedCache {
    directory: PathBuf,
    max_items: usize,
}

impl BoundedFeedCache {
    /// Create a cache rooted at `directory` with the default capacity
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::with_max_items(directory, DEFAULT_MAX_ITEMS)
    }

    /// Create a cache with an explicit capacity
    pub fn with_max_items(directory: impl Into<PathBuf>, max_items: usize) -> Self {
        Self {
            directory: directory.into(),
            max_items,
        }
    }

    /// File backing the snapshot for `(kind, user)`
    ///
    /// User ids are hashed so arbitrary handles map to safe file names.
    pub fn path_for(&self, kind: FeedKind, user: &UserId) -> PathBuf {
        self.directory
            .join(format!("feed-{}-{}.json", kind.as_str(), user_key(user)))
    }

    /// Snapshot the first `max_items` of `items`
    ///
    /// Failures are logged and dropped.
    pub async fn cache<T: Serialize>(&self, items: &[T], kind: FeedKind, user: &UserId) {
        let capped = &items[..items.len().min(self.max_items)];
        let path = self.path_for(kind, user);

        match write_json_atomic(&path, capped).await {
            Ok(()) => {
                CACHE_WRITES_TOTAL.with_label_values(&["feed", "ok"]).inc();
                tracing::debug!(kind = %kind, user_id = %user, count = capped.len(), "Feed snapshot cached");
            }
            Err(error) => {
                CACHE_WRITES_TOTAL.with_label_values(&["feed", "error"]).inc();
                tracing::warn!(%error, kind = %kind, user_id = %user, "Failed to write feed cache");
            }
        }
    }

    /// Read the snapshot for `(kind, user)`
    ///
    /// Missing, unreadable or undecodable files all yield an empty list.
    pub async fn cached<T: DeserializeOwned>(&self, kind: FeedKind, user: &UserId) -> Vec<T> {
        let path = self.path_for(kind, user);

        match read_json::<Vec<T>>(&path).await {
            Ok(Some(items)) => {
                CACHE_READS_TOTAL.with_label_values(&["feed", "hit"]).inc();
                items
            }
            Ok(None) => {
                CACHE_READS_TOTAL.with_label_values(&["feed", "miss"]).inc();
                Vec::new()
            }
            Err(error) => {
                CACHE_READS_TOTAL.with_label_values(&["feed", "error"]).inc();
                tracing::warn!(%error, kind = %kind, user_id = %user, "Discarding unreadable feed cache");
                Vec::new()
            }
        }
    }

    /// Remove the snapshot for `(kind, user)`; a missing file is fine
    pub async fn invalidate(&self, kind: FeedKind, user: &UserId) {
        let path = self.path_for(kind, user);
        match remove_if_present(&path).await {
            Ok(removed) => {
                tracing::debug!(kind = %kind, user_id = %user, removed, "Feed cache invalidated");
            }
            Err(error) => {
                tracing::warn!(%error, kind = %kind, user_id = %user, "Failed to invalidate feed cache");
            }
        }
    }
}

// =============================================================================
// Search history cache
// =============================================================================

/// Recency-ordered search history of one user
///
/// Unlike the feed cache this is not count-capped: recording a value removes
/// any earlier equal value and appends the new one. Reads sort by
/// `last_updated`, newest first.
#[derive(Debug, Clone)]
pub struct SearchHistoryCache {
    path: PathBuf,
}

impl SearchHistoryCache {
    pub fn new(documents_directory: impl AsRef<Path>, user: &UserId) -> Self {
        Self {
            path: documents_directory
                .as_ref()
                .join(format!("search_history-{}.json", user_key(user))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a search performed now
    pub async fn record(&self, value: SearchHistoryValue) {
        self.record_at(value, Utc::now()).await;
    }

    /// Record a search with an explicit timestamp
    pub async fn record_at(&self, value: SearchHistoryValue, at: DateTime<Utc>) {
        let mut items = self.load_raw().await;
        items.retain(|item| item.value != value);
        items.push(SearchHistoryItem {
            value,
            last_updated: at,
        });
        self.store(&items).await;
    }

    /// History sorted by `last_updated` descending
    pub async fn history(&self) -> Vec<SearchHistoryItem> {
        let mut items = self.load_raw().await;
        items.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        items
    }

    /// Forget one value
    pub async fn remove(&self, value: &SearchHistoryValue) {
        let mut items = self.load_raw().await;
        let before = items.len();
        items.retain(|item| &item.value != value);
        if items.len() != before {
            self.store(&items).await;
        }
    }

    pub async fn clear(&self) {
        if let Err(error) = remove_if_present(&self.path).await {
            tracing::warn!(%error, "Failed to clear search history");
        }
    }

    async fn load_raw(&self) -> Vec<SearchHistoryItem> {
        match read_json::<Vec<SearchHistoryItem>>(&self.path).await {
            Ok(Some(items)) => {
                CACHE_READS_TOTAL
                    .with_label_values(&["search_history", "hit"])
                    .inc();
                items
            }
            Ok(None) => {
                CACHE_READS_TOTAL
                    .with_label_values(&["search_history", "miss"])
                    .inc();
                Vec::new()
            }
            Err(error) => {
                CACHE_READS_TOTAL
                    .with_label_values(&["search_history", "error"])
                    .inc();
                tracing::warn!(%error, "Discarding unreadable search history");
                Vec::new()
            }
        }
    }

    async fn store(&self, items: &[SearchHistoryItem]) {
        match write_json_atomic(&self.path, items).await {
            Ok(()) => {
                CACHE_WRITES_TOTAL
                    .with_label_values(&["search_history", "ok"])
                    .inc();
            }
            Err(error) => {
                CACHE_WRITES_TOTAL
                    .with_label_values(&["search_history", "error"])
                    .inc();
                tracing::warn!(%error, "Failed to write search history");
            }
        }
    }
}
