//! Error types for feedsync
//!
//! Only `AppError` crosses the crate boundary for fallible setup work.
//! Cache and reconciliation failures never surface here; they are logged
//! and degrade to empty results or no-ops.

use thiserror::Error;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistent store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Feed loading error
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Persistent store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// An operation was issued before `load()` finished
    #[error("Persistent store is not loaded")]
    NotLoaded,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),
}

/// Errors reported by the network collaborator
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The request was cancelled cooperatively
    #[error("Request cancelled")]
    Cancelled,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Request failed: {0}")]
    Request(String),
}

impl ClientError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }
}

/// Feed loading errors
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Network collaborator error: {0}")]
    Client(#[from] ClientError),
}

/// Bounded cache errors (never propagated past the cache)
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache decode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors delivered on change observation streams
#[derive(Debug, Error)]
pub enum ObserveError {
    /// The watched object is not attached to a live session
    #[error("Object has no owning session")]
    NoOwningSession,

    /// A store event that does not describe object changes
    #[error("Store event is not a change notification")]
    NotAChangeNotification,

    #[error("Observation failed: {0}")]
    Wrapped(#[from] BroadcastStreamRecvError),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
