//! feedsync - client-side feed synchronization and caching core
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Account Session                          │
//! │  - Built at login, torn down at logout                      │
//! │  - Debounced feed snapshot writers                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Feed store (pagination, single-flight loads)             │
//! │  - Mutation reconciliation                                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - Bounded feed cache / search history (JSON files)         │
//! │  - Persistent store, sessions, change observation (SQLite)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `service`: Feed store and reconciliation
//! - `data`: Models, caches and the persistent store
//! - `session`: Per-account context
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod service;
pub mod session;

pub use session::AccountSession;
