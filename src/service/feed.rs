//! Feed store
//!
//! Holds one ordered, newest-first list per feed kind and publishes it over
//! a `watch` channel. Each list has a single writer: every change is one
//! `watch` publication, applied in call order.
//!
//! Loads are single-flight per kind. A load that finds another load of the
//! same kind running returns `LoadOutcome::AlreadyInFlight` without touching
//! the network.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

use super::client::{FeedClient, PageCursor};
use super::reconcile::{FeedEntry, FeedIntent, reconcile};
use crate::data::{BoundedFeedCache, FeedItem, FeedKind, UserId};
use crate::error::FeedError;
use crate::metrics::{FEED_LOADS_TOTAL, FEED_SIZE, RECONCILIATION_MISSES_TOTAL};

/// Result of a load call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The page was applied; number of new entries
    Loaded(usize),
    /// Another load of this kind is running
    AlreadyInFlight,
    /// The network collaborator cancelled the request
    Cancelled,
    /// The server has nothing older
    EndReached,
}

impl LoadOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Loaded(_) => "loaded",
            Self::AlreadyInFlight => "in_flight",
            Self::Cancelled => "cancelled",
            Self::EndReached => "end_reached",
        }
    }
}

/// Result of an `update` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Entries replaced in place, across all kinds
    Applied(usize),
    /// Entries removed, across all kinds
    Removed(usize),
    /// No entry matched; nothing changed
    Missed,
}

struct FeedState {
    records: watch::Sender<Vec<FeedEntry>>,
    in_flight: AtomicBool,
    reached_end: AtomicBool,
}

impl FeedState {
    fn new() -> Self {
        let (records, _) = watch::channel(Vec::new());
        Self {
            records,
            in_flight: AtomicBool::new(false),
            reached_end: AtomicBool::new(false),
        }
    }

    fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(&self.in_flight))
    }

    fn first_id(&self) -> Option<String> {
        self.records
            .borrow()
            .iter()
            .find(|entry| !entry.is_loader())
            .map(|entry| entry.id().to_string())
    }

    fn last_id(&self) -> Option<String> {
        self.records
            .borrow()
            .iter()
            .rev()
            .find(|entry| !entry.is_loader())
            .map(|entry| entry.id().to_string())
    }
}

/// Clears the in-flight marker when the load finishes or its future is
/// dropped
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// In-memory feeds for one account
pub struct FeedStore {
    client: Arc<dyn FeedClient>,
    feeds: [FeedState; 3],
}

impl FeedStore {
    pub fn new(client: Arc<dyn FeedClient>) -> Self {
        Self {
            client,
            feeds: [FeedState::new(), FeedState::new(), FeedState::new()],
        }
    }

    fn state(&self, kind: FeedKind) -> &FeedState {
        match kind {
            FeedKind::Home => &self.feeds[0],
            FeedKind::NotificationsAll => &self.feeds[1],
            FeedKind::NotificationsMentions => &self.feeds[2],
        }
    }

    /// Published list for `kind`
    pub fn records(&self, kind: FeedKind) -> watch::Receiver<Vec<FeedEntry>> {
        self.state(kind).records.subscribe()
    }

    /// Copy of the current list for `kind`
    pub fn current(&self, kind: FeedKind) -> Vec<FeedEntry> {
        self.state(kind).records.borrow().clone()
    }

    pub fn is_loading(&self, kind: FeedKind) -> bool {
        self.state(kind).in_flight.load(Ordering::Acquire)
    }

    /// Replace the list with the newest page
    pub async fn load_initial(&self, kind: FeedKind) -> Result<LoadOutcome, FeedError> {
        let state = self.state(kind);
        let Some(_guard) = state.try_begin() else {
            return Ok(self.finish(kind, LoadOutcome::AlreadyInFlight));
        };
        self.fetch_initial(kind, state).await
    }

    /// Append the page strictly older than the last entry
    pub async fn load_next(&self, kind: FeedKind) -> Result<LoadOutcome, FeedError> {
        let state = self.state(kind);
        let Some(_guard) = state.try_begin() else {
            return Ok(self.finish(kind, LoadOutcome::AlreadyInFlight));
        };

        let Some(last_id) = state.last_id() else {
            return self.fetch_initial(kind, state).await;
        };
        if state.reached_end.load(Ordering::Acquire) {
            return Ok(self.finish(kind, LoadOutcome::EndReached));
        }

        tracing::debug!(kind = %kind, max_id = %last_id, "Loading older page");
        let items = match self.fetch(kind, PageCursor::older_than(last_id)).await? {
            Ok(items) => items,
            Err(outcome) => return Ok(self.finish(kind, outcome)),
        };

        if items.is_empty() {
            state.reached_end.store(true, Ordering::Release);
            state.records.send_if_modified(|records| {
                let before = records.len();
                records.retain(|entry| !entry.is_loader());
                records.len() != before
            });
            return Ok(self.finish(kind, LoadOutcome::EndReached));
        }

        let mut appended = 0;
        state.records.send_modify(|records| {
            records.retain(|entry| !entry.is_loader());
            let page = new_entries(kind, items, records);
            appended = page.len();
            records.extend(page);
            records.push(FeedEntry::loader(kind));
        });
        Ok(self.finish(kind, LoadOutcome::Loaded(appended)))
    }

    /// Prepend the page strictly newer than the first entry
    pub async fn load_newer(&self, kind: FeedKind) -> Result<LoadOutcome, FeedError> {
        let state = self.state(kind);
        let Some(_guard) = state.try_begin() else {
            return Ok(self.finish(kind, LoadOutcome::AlreadyInFlight));
        };

        let Some(first_id) = state.first_id() else {
            return self.fetch_initial(kind, state).await;
        };

        tracing::debug!(kind = %kind, since_id = %first_id, "Loading newer page");
        let items = match self.fetch(kind, PageCursor::newer_than(first_id)).await? {
            Ok(items) => items,
            Err(outcome) => return Ok(self.finish(kind, outcome)),
        };

        let mut prepended = 0;
        state.records.send_if_modified(|records| {
            let page = new_entries(kind, items, records);
            prepended = page.len();
            if page.is_empty() {
                return false;
            }
            records.splice(0..0, page);
            true
        });
        Ok(self.finish(kind, LoadOutcome::Loaded(prepended)))
    }

    /// Apply an optimistic mutation to every feed holding the entity
    ///
    /// A miss is logged once and leaves every list unchanged.
    pub fn update(&self, entity: &FeedItem, intent: FeedIntent) -> UpdateOutcome {
        let mut matched = 0;
        for kind in FeedKind::ALL {
            let state = self.state(kind);
            state.records.send_if_modified(|records| {
                let hit = reconcile(records, entity, intent).is_some();
                if hit {
                    matched += 1;
                }
                hit
            });
            FEED_SIZE
                .with_label_values(&[kind.as_str()])
                .set(state.records.borrow().len() as i64);
        }

        if matched == 0 {
            RECONCILIATION_MISSES_TOTAL
                .with_label_values(&[intent.as_str()])
                .inc();
            tracing::warn!(
                id = %entity.id(),
                intent = %intent,
                "No feed entry matches mutation; ignoring"
            );
            return UpdateOutcome::Missed;
        }

        tracing::debug!(id = %entity.id(), intent = %intent, matched, "Mutation applied");
        match intent {
            FeedIntent::Delete => UpdateOutcome::Removed(matched),
            _ => UpdateOutcome::Applied(matched),
        }
    }

    /// Set the local-only reveal flag on every entry with `id`
    ///
    /// Returns false when no entry matched.
    pub fn set_sensitivity_revealed(&self, id: &str, revealed: bool) -> bool {
        let mut found = false;
        for kind in FeedKind::ALL {
            self.state(kind).records.send_if_modified(|records| {
                let mut changed = false;
                for entry in records.iter_mut().filter(|entry| entry.id() == id) {
                    found = true;
                    if entry.sensitivity_revealed != revealed {
                        entry.sensitivity_revealed = revealed;
                        changed = true;
                    }
                }
                changed
            });
        }
        found
    }

    /// Server entities of `kind`, newest first, loader markers excluded
    pub fn snapshot(&self, kind: FeedKind) -> Vec<FeedItem> {
        self.state(kind)
            .records
            .borrow()
            .iter()
            .filter_map(FeedEntry::item)
            .collect()
    }

    /// Fill an empty feed from the bounded cache
    ///
    /// Returns the number of entries restored; a feed that already has
    /// entries is left alone.
    pub async fn warm_start(&self, kind: FeedKind, cache: &BoundedFeedCache, user: &UserId) -> usize {
        let state = self.state(kind);
        if !state.records.borrow().is_empty() {
            return 0;
        }

        let items: Vec<FeedItem> = cache.cached(kind, user).await;
        let mut restored = 0;
        state.records.send_if_modified(|records| {
            if !records.is_empty() || items.is_empty() {
                return false;
            }
            *records = new_entries(kind, items, &[]);
            restored = records.len();
            true
        });

        if restored > 0 {
            tracing::info!(kind = %kind, user_id = %user, restored, "Feed warm-started from cache");
        }
        restored
    }

    /// Write the current list of `kind` to the bounded cache
    pub async fn persist_snapshot(&self, kind: FeedKind, cache: &BoundedFeedCache, user: &UserId) {
        let items = self.snapshot(kind);
        cache.cache(&items, kind, user).await;
    }

    async fn fetch_initial(&self, kind: FeedKind, state: &FeedState) -> Result<LoadOutcome, FeedError> {
        state.reached_end.store(false, Ordering::Release);

        tracing::debug!(kind = %kind, "Loading newest page");
        let items = match self.fetch(kind, PageCursor::newest()).await? {
            Ok(items) => items,
            Err(outcome) => return Ok(self.finish(kind, outcome)),
        };

        let mut entries = new_entries(kind, items, &[]);
        let loaded = entries.len();
        if loaded > 0 {
            entries.push(FeedEntry::loader(kind));
        }
        state.records.send_replace(entries);
        Ok(self.finish(kind, LoadOutcome::Loaded(loaded)))
    }

    /// Fetch a page; cancellation is an outcome, not an error
    async fn fetch(
        &self,
        kind: FeedKind,
        cursor: PageCursor,
    ) -> Result<Result<Vec<FeedItem>, LoadOutcome>, FeedError> {
        match self.client.fetch(kind, cursor).await {
            Ok(items) => Ok(Ok(items)),
            Err(error) if error.is_cancellation() => {
                tracing::debug!(kind = %kind, "Feed load cancelled");
                Ok(Err(LoadOutcome::Cancelled))
            }
            Err(error) => {
                FEED_LOADS_TOTAL
                    .with_label_values(&[kind.as_str(), "error"])
                    .inc();
                tracing::warn!(%error, kind = %kind, "Feed load failed");
                Err(error.into())
            }
        }
    }

    fn finish(&self, kind: FeedKind, outcome: LoadOutcome) -> LoadOutcome {
        FEED_LOADS_TOTAL
            .with_label_values(&[kind.as_str(), outcome.as_str()])
            .inc();
        FEED_SIZE
            .with_label_values(&[kind.as_str()])
            .set(self.state(kind).records.borrow().len() as i64);
        outcome
    }
}

/// Wrap a page as entries, dropping ids already present or repeated
fn new_entries(kind: FeedKind, items: Vec<FeedItem>, existing: &[FeedEntry]) -> Vec<FeedEntry> {
    let mut seen: HashSet<String> = existing.iter().map(|entry| entry.id().to_string()).collect();
    items
        .into_iter()
        .filter(|item| seen.insert(item.id().to_string()))
        .map(|item| FeedEntry::new(kind, item))
        .collect()
}
