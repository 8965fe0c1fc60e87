//! Network collaborator boundary
//!
//! Request construction and authentication live behind this trait; the
//! feed store only knows about kinds and cursors.

use async_trait::async_trait;

use crate::data::{FeedItem, FeedKind};
use crate::error::ClientError;

/// Pagination cursor (Mastodon `max_id` / `since_id` semantics)
///
/// `max_id` asks for items strictly older than the id, `since_id` for
/// items strictly newer. Neither set means "newest page".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PageCursor {
    pub max_id: Option<String>,
    pub since_id: Option<String>,
}

impl PageCursor {
    pub fn newest() -> Self {
        Self::default()
    }

    pub fn older_than(id: impl Into<String>) -> Self {
        Self {
            max_id: Some(id.into()),
            since_id: None,
        }
    }

    pub fn newer_than(id: impl Into<String>) -> Self {
        Self {
            max_id: None,
            since_id: Some(id.into()),
        }
    }
}

/// Paginated fetch of feed entities
///
/// Implementations return pages newest first and report cooperative
/// cancellation as `ClientError::Cancelled`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedClient: Send + Sync {
    async fn fetch(&self, kind: FeedKind, cursor: PageCursor)
    -> Result<Vec<FeedItem>, ClientError>;
}
