//! Service layer
//!
//! In-memory feeds and the logic that keeps them consistent with the
//! network collaborator and with optimistic local mutations.

mod client;
mod feed;
mod reconcile;

#[cfg(test)]
pub(crate) mod fixtures;

pub use client::{FeedClient, PageCursor};
pub use feed::{FeedStore, LoadOutcome, UpdateOutcome};
pub use reconcile::{FeedEntry, FeedIntent, FeedPayload, reconcile};
