//! Persistent store lifecycle
//!
//! One SQLite file per shared group directory. The store is loaded
//! asynchronously; until `load()` completes no session can be created.
//!
//! Load failures fall into two tiers. A store whose applied migrations are
//! no longer known to this build is recoverable: the file is destroyed and a
//! fresh store is created. Anything else is fatal and terminates the
//! process, since continuing against a store in an unknown state risks
//! silent corruption.

use sqlx::migrate::{MigrateError, Migrator};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, broadcast, watch};

use super::observer::{ChangeNotification, ChangeObserver, StoreEvent};
use super::session::{Session, SessionId, SessionOptions, SessionRegistry};
use crate::error::StoreError;
use crate::metrics::STORE_LOADS_TOTAL;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Exit status used when the store cannot be loaded
pub const EXIT_STORE_UNRECOVERABLE: i32 = 70;

/// Reason text of load failures that mean "this build has no migration path
/// for the store on disk".
///
/// TODO: remove the text match; sqlx reports `MigrateError::VersionMissing`,
/// which `LoadFailure::classify` checks first.
pub const MISSING_MIGRATION_REASONS: &[&str] =
    &["was previously applied but is missing in the resolved migrations"];

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Whether a load failure can be repaired by rebuilding the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFailure {
    /// Destroy the file and load a fresh store
    Recoverable,
    /// Terminate
    Fatal,
}

impl LoadFailure {
    pub fn classify(error: &StoreError) -> Self {
        if let StoreError::Migrate(MigrateError::VersionMissing(_)) = error {
            return Self::Recoverable;
        }
        if is_missing_migration_reason(&error.to_string()) {
            Self::Recoverable
        } else {
            Self::Fatal
        }
    }
}

/// Match a failure reason against the known missing-migration texts
pub fn is_missing_migration_reason(reason: &str) -> bool {
    MISSING_MIGRATION_REASONS
        .iter()
        .any(|known| reason.contains(known))
}

pub(crate) struct StoreInner {
    path: PathBuf,
    pool: RwLock<Option<SqlitePool>>,
    loaded: watch::Sender<bool>,
    events: broadcast::Sender<StoreEvent>,
    pub(crate) registry: SessionRegistry,
    next_session_id: AtomicU64,
}

impl StoreInner {
    pub(crate) async fn pool(&self) -> Result<SqlitePool, StoreError> {
        self.pool.read().await.clone().ok_or(StoreError::NotLoaded)
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish_change(&self, notification: Arc<ChangeNotification>) {
        // No receivers is fine
        let _ = self.events.send(StoreEvent::ObjectsDidChange(notification));
    }

    async fn install(&self, pool: SqlitePool) {
        *self.pool.write().await = Some(pool);
        self.loaded.send_replace(true);
        let _ = self.events.send(StoreEvent::Loaded);
    }

    async fn close(&self) {
        self.loaded.send_replace(false);
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
    }
}

/// The on-device relational store
///
/// Cheap to clone; clones share one underlying store.
#[derive(Clone)]
pub struct PersistentStore {
    inner: Arc<StoreInner>,
}

impl PersistentStore {
    /// Create an unloaded store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (loaded, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(StoreInner {
                path: path.into(),
                pool: RwLock::new(None),
                loaded,
                events,
                registry: SessionRegistry::default(),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Load the store, terminating the process on a fatal failure
    pub async fn load(&self) {
        if let Err(error) = self.try_load().await {
            tracing::error!(
                %error,
                path = %self.inner.path.display(),
                "Persistent store failed to load; terminating"
            );
            std::process::exit(EXIT_STORE_UNRECOVERABLE);
        }
    }

    /// Load the store, recovering from a missing migration path
    ///
    /// Returns only fatal errors; recoverable ones are repaired here.
    pub async fn try_load(&self) -> Result<(), StoreError> {
        let path = &self.inner.path;
        if self.is_loaded() {
            tracing::debug!(path = %path.display(), "Persistent store already loaded");
            return Ok(());
        }

        let error = match open_pool(path).await {
            Ok(pool) => {
                self.inner.install(pool).await;
                STORE_LOADS_TOTAL.with_label_values(&["loaded"]).inc();
                tracing::info!(path = %path.display(), "Persistent store loaded");
                return Ok(());
            }
            Err(error) => error,
        };

        match LoadFailure::classify(&error) {
            LoadFailure::Recoverable => {
                tracing::warn!(
                    %error,
                    path = %path.display(),
                    "Store has no migration path; destroying and recreating"
                );
                destroy_store_files(path).await?;
                let pool = open_pool(path).await.inspect_err(|_| {
                    STORE_LOADS_TOTAL.with_label_values(&["fatal"]).inc();
                })?;
                self.inner.install(pool).await;
                STORE_LOADS_TOTAL.with_label_values(&["recovered"]).inc();
                tracing::info!(path = %path.display(), "Persistent store recreated");
                Ok(())
            }
            LoadFailure::Fatal => {
                STORE_LOADS_TOTAL.with_label_values(&["fatal"]).inc();
                Err(error)
            }
        }
    }

    /// Destroy the store and load a fresh one without relaunching
    ///
    /// Every live session is told all of its objects were invalidated.
    pub async fn rebuild(&self) -> Result<(), StoreError> {
        let path = &self.inner.path;
        tracing::warn!(path = %path.display(), "Rebuilding persistent store");

        self.inner.close().await;
        destroy_store_files(path).await?;
        let pool = open_pool(path).await?;

        self.inner.registry.invalidate_all();
        self.inner.install(pool).await;
        for session in self.inner.registry.ids() {
            self.inner
                .publish_change(Arc::new(ChangeNotification::all_invalidated(session)));
        }

        STORE_LOADS_TOTAL.with_label_values(&["rebuilt"]).inc();
        tracing::info!(path = %path.display(), "Persistent store rebuilt");
        Ok(())
    }

    /// Close the connection pool; the store must be loaded again before use
    pub async fn close(&self) {
        self.inner.close().await;
    }

    pub fn is_loaded(&self) -> bool {
        *self.inner.loaded.borrow()
    }

    /// "Finished loading" signal
    pub fn loaded(&self) -> watch::Receiver<bool> {
        self.inner.loaded.subscribe()
    }

    /// Resolve once the store is loaded
    pub async fn wait_until_loaded(&self) {
        let mut loaded = self.inner.loaded.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = loaded.wait_for(|loaded| *loaded).await;
    }

    /// Open the primary session; callers keep one for the UI
    pub fn view_session(&self) -> Result<Session, StoreError> {
        self.new_session(SessionOptions::view())
    }

    /// Open a session with explicit options
    pub fn new_session(&self, options: SessionOptions) -> Result<Session, StoreError> {
        if !self.is_loaded() {
            return Err(StoreError::NotLoaded);
        }
        let id = SessionId(self.inner.next_session_id.fetch_add(1, Ordering::Relaxed));
        Ok(Session::open(Arc::clone(&self.inner), id, options))
    }

    /// Run one unit of work on a fresh background session
    ///
    /// The session is dropped when `work` finishes; unsaved changes are
    /// discarded.
    pub async fn perform_background<F, Fut, T>(&self, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let session = self.new_session(SessionOptions::background())?;
        work(session).await
    }

    /// Observation streams over this store's change notifications
    pub fn observer(&self) -> ChangeObserver {
        ChangeObserver::new(Arc::clone(&self.inner))
    }

    /// Raw event channel
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.subscribe()
    }
}

async fn open_pool(path: &Path) -> Result<SqlitePool, StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    if let Err(error) = MIGRATOR.run(&pool).await {
        pool.close().await;
        return Err(error.into());
    }
    Ok(pool)
}

/// Remove the store file and its WAL/SHM siblings
async fn destroy_store_files(path: &Path) -> Result<(), StoreError> {
    for suffix in ["", "-wal", "-shm"] {
        let mut target = path.as_os_str().to_owned();
        target.push(suffix);
        match tokio::fs::remove_file(PathBuf::from(target)).await {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_missing_is_recoverable() {
        let error = StoreError::Migrate(MigrateError::VersionMissing(20990101000000));
        assert_eq!(LoadFailure::classify(&error), LoadFailure::Recoverable);
    }

    #[test]
    fn test_reason_text_is_recoverable() {
        let error = StoreError::Database(sqlx::Error::Protocol(
            "migration 7 was previously applied but is missing in the resolved migrations"
                .to_string(),
        ));
        assert_eq!(LoadFailure::classify(&error), LoadFailure::Recoverable);
        assert!(is_missing_migration_reason(
            "migration 3 was previously applied but is missing in the resolved migrations"
        ));
    }

    #[test]
    fn test_other_failures_are_fatal() {
        assert_eq!(
            LoadFailure::classify(&StoreError::Migrate(MigrateError::Dirty(3))),
            LoadFailure::Fatal
        );
        assert_eq!(
            LoadFailure::classify(&StoreError::Io(std::io::Error::new(
                ErrorKind::PermissionDenied,
                "read-only file system"
            ))),
            LoadFailure::Fatal
        );
        assert!(!is_missing_migration_reason("file is not a database"));
    }
}
