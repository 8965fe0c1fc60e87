//! Common test utilities for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use feedsync::config::{AppConfig, CacheConfig, LoggingConfig, StoreConfig};
use feedsync::data::{Account, FeedItem, FeedKind, PersistentStore, Status};
use feedsync::error::ClientError;
use feedsync::service::{FeedClient, PageCursor};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// Scratch directories and configuration for one test
pub struct TestEnv {
    pub config: AppConfig,
    pub _temp_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let config = AppConfig {
            store: StoreConfig {
                path: root.join("group").join("feedsync.sqlite"),
            },
            cache: CacheConfig {
                directory: root.join("caches"),
                documents_directory: root.join("documents"),
                max_items: 100,
                snapshot_debounce_ms: 20,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
        };

        Self {
            config,
            _temp_dir: temp_dir,
        }
    }

    pub fn store(&self) -> PersistentStore {
        PersistentStore::new(&self.config.store.path)
    }

    /// A store that finished loading
    pub async fn loaded_store(&self) -> PersistentStore {
        let store = self.store();
        store.try_load().await.unwrap();
        store
    }
}

/// Scripted network collaborator
///
/// Pages are keyed by (kind, cursor); unknown cursors return an empty page.
/// Every call waits `latency` before answering.
pub struct FakeClient {
    pages: Mutex<HashMap<(FeedKind, PageCursor), Result<Vec<FeedItem>, ClientError>>>,
    calls: Mutex<Vec<(FeedKind, PageCursor)>>,
    latency: Duration,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            latency,
        }
    }

    pub fn page(self, kind: FeedKind, cursor: PageCursor, items: Vec<FeedItem>) -> Self {
        self.pages.lock().unwrap().insert((kind, cursor), Ok(items));
        self
    }

    pub fn failing(self, kind: FeedKind, cursor: PageCursor, error: ClientError) -> Self {
        self.pages.lock().unwrap().insert((kind, cursor), Err(error));
        self
    }

    pub fn calls(&self) -> Vec<(FeedKind, PageCursor)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedClient for FakeClient {
    async fn fetch(&self, kind: FeedKind, cursor: PageCursor) -> Result<Vec<FeedItem>, ClientError> {
        self.calls.lock().unwrap().push((kind, cursor.clone()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.pages
            .lock()
            .unwrap()
            .get(&(kind, cursor))
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub fn account(id: &str) -> Account {
    Account {
        id: id.to_string(),
        username: format!("user{id}"),
        acct: format!("user{id}@example.social"),
        display_name: String::new(),
        avatar: String::new(),
        url: String::new(),
        bot: false,
    }
}

pub fn status(id: &str) -> Status {
    Status {
        id: id.to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        account: account("1"),
        content: format!("<p>status {id}</p>"),
        uri: format!("https://example.social/statuses/{id}"),
        url: None,
        in_reply_to_id: None,
        sensitive: false,
        spoiler_text: String::new(),
        visibility: "public".to_string(),
        language: None,
        replies_count: 0,
        reblogs_count: 0,
        favourites_count: 0,
        edited_at: None,
        reblog: None,
        media_attachments: Vec::new(),
        favourited: None,
        reblogged: None,
        bookmarked: None,
    }
}

pub fn statuses(ids: &[&str]) -> Vec<FeedItem> {
    ids.iter().map(|id| FeedItem::Status(status(id))).collect()
}

/// Ids of the non-loader entries, in order
pub fn entry_ids(entries: &[feedsync::service::FeedEntry]) -> Vec<String> {
    entries
        .iter()
        .filter(|entry| !entry.is_loader())
        .map(|entry| entry.id().to_string())
        .collect()
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
