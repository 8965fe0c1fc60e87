//! Data layer module
//!
//! Handles all data persistence and caching:
//! - Wire-format models
//! - Bounded feed cache and search history (JSON files)
//! - Persistent store lifecycle, sessions and change observation (SQLite)

mod cache;
mod database;
mod models;
mod observer;
mod session;

pub use cache::{BoundedFeedCache, DEFAULT_MAX_ITEMS, SearchHistoryCache};
pub use database::{
    EXIT_STORE_UNRECOVERABLE, LoadFailure, MISSING_MIGRATION_REASONS, PersistentStore,
    is_missing_migration_reason,
};
pub use models::*;
pub use observer::{
    ChangeKind, ChangeNotification, ChangeObserver, ObjectChange, SessionChanges, StoreEvent,
};
pub use session::{
    ManagedObject, MergePolicy, ObjectId, Properties, Session, SessionId, SessionOptions,
};
