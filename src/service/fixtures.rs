//! Entity builders shared by service tests

use chrono::{TimeZone, Utc};

use crate::data::{Account, FeedItem, Notification, NotificationType, Status};

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

pub fn reblog(id: &str, original: Status) -> Status {
    Status {
        reblog: Some(Box::new(original)),
        reblogged: Some(true),
        ..status(id)
    }
}

pub fn notification(id: &str, notification_type: NotificationType) -> Notification {
    Notification {
        id: id.to_string(),
        notification_type,
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        account: account("2"),
        status: None,
    }
}

pub fn statuses(ids: &[&str]) -> Vec<FeedItem> {
    ids.iter().map(|id| FeedItem::Status(status(id))).collect()
}
