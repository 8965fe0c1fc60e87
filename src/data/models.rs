//! Data models
//!
//! Wire-format entities shared by the network collaborator, the feed store
//! and the on-disk caches. Field names follow the Mastodon REST API so cached
//! files hold exactly what the server sent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Identity
// =============================================================================

/// Opaque user id supplied by the authentication collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Feed kind
// =============================================================================

/// Logical feed an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Home,
    NotificationsAll,
    NotificationsMentions,
}

impl FeedKind {
    pub const ALL: [FeedKind; 3] = [
        FeedKind::Home,
        FeedKind::NotificationsAll,
        FeedKind::NotificationsMentions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::NotificationsAll => "notifications_all",
            Self::NotificationsMentions => "notifications_mentions",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Account
// =============================================================================

/// Account (Mastodon API compatible subset)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub acct: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub bot: bool,
}

// =============================================================================
// Status
// =============================================================================

/// A post/toot as delivered by the server
///
/// `reblog` is set when this status is a reblog wrapper; the wrapper has its
/// own id and the original lives inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub account: Account,
    pub content: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub in_reply_to_id: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub spoiler_text: String,
    #[serde(default = "default_visibility")]
    pub visibility: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub replies_count: i32,
    #[serde(default)]
    pub reblogs_count: i32,
    #[serde(default)]
    pub favourites_count: i32,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reblog: Option<Box<Status>>,
    #[serde(default)]
    pub media_attachments: Vec<MediaAttachment>,
    #[serde(default)]
    pub favourited: Option<bool>,
    #[serde(default)]
    pub reblogged: Option<bool>,
    #[serde(default)]
    pub bookmarked: Option<bool>,
}

fn default_visibility() -> String {
    "public".to_string()
}

impl Status {
    /// Id of the wrapped original, if this status is a reblog
    pub fn reblog_id(&self) -> Option<&str> {
        self.reblog.as_deref().map(|original| original.id.as_str())
    }
}

/// Media attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub id: String,
    #[serde(rename = "type")]
    pub media_type: String,
    pub url: String,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub blurhash: Option<String>,
}

// =============================================================================
// Notification
// =============================================================================

/// Notification type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Mention,
    Status,
    Reblog,
    Follow,
    FollowRequest,
    Favourite,
    Poll,
    Update,
    #[serde(other)]
    Unknown,
}

/// Notification (Mastodon API compatible subset)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub created_at: DateTime<Utc>,
    pub account: Account,
    #[serde(default)]
    pub status: Option<Status>,
}

// =============================================================================
// Feed item
// =============================================================================

/// A server entity that can appear in a feed
///
/// Serialized untagged so cache files contain plain wire entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedItem {
    Status(Status),
    Notification(Notification),
}

impl FeedItem {
    pub fn id(&self) -> &str {
        match self {
            Self::Status(status) => &status.id,
            Self::Notification(notification) => &notification.id,
        }
    }
}

impl From<Status> for FeedItem {
    fn from(status: Status) -> Self {
        Self::Status(status)
    }
}

impl From<Notification> for FeedItem {
    fn from(notification: Notification) -> Self {
        Self::Notification(notification)
    }
}

// =============================================================================
// Search history
// =============================================================================

/// Something the user searched for
///
/// Compared by value; accounts compare by their explicit id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchHistoryValue {
    Query { text: String },
    Account { id: String, acct: String },
    Hashtag { name: String },
}

impl PartialEq for SearchHistoryValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Query { text: a }, Self::Query { text: b }) => a == b,
            (Self::Account { id: a, .. }, Self::Account { id: b, .. }) => a == b,
            (Self::Hashtag { name: a }, Self::Hashtag { name: b }) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }
}

impl Eq for SearchHistoryValue {}

/// A search history record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHistoryItem {
    pub value: SearchHistoryValue,
    pub last_updated: DateTime<Utc>,
}
