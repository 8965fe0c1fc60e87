//! Feed entries and mutation reconciliation
//!
//! A mutation names a server entity and an intent. Reconciliation finds the
//! entries showing that entity and swaps the new payload in, keeping each
//! entry's index, kind and local-only "sensitivity revealed" flag. A status
//! may be shown directly, as the original inside a reblog wrapper, or as the
//! subject of a notification. Only `Delete` changes the list length.

use std::fmt;

use crate::data::{FeedItem, FeedKind, Notification, Status};

// =============================================================================
// Feed entry
// =============================================================================

/// Payload of a feed entry
#[derive(Debug, Clone, PartialEq)]
pub enum FeedPayload {
    Status(Status),
    Notification(Notification),
    /// "More available" marker at the end of a feed
    Loader(String),
}

/// One item in an in-memory feed
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub kind: FeedKind,
    pub payload: FeedPayload,
    /// UI state: the user revealed sensitive content. Never sent to the
    /// server and carried across payload replacement.
    pub sensitivity_revealed: bool,
}

impl FeedEntry {
    pub fn new(kind: FeedKind, item: FeedItem) -> Self {
        Self {
            kind,
            payload: item.into(),
            sensitivity_revealed: false,
        }
    }

    pub fn loader(kind: FeedKind) -> Self {
        Self {
            kind,
            payload: FeedPayload::Loader(format!("loader-{}", ulid::Ulid::new())),
            sensitivity_revealed: false,
        }
    }

    /// Identity: the wrapped status or notification id
    pub fn id(&self) -> &str {
        match &self.payload {
            FeedPayload::Status(status) => &status.id,
            FeedPayload::Notification(notification) => &notification.id,
            FeedPayload::Loader(id) => id,
        }
    }

    /// Id of the original this entry reblogs, if it is a reblog wrapper
    pub fn wrapped_id(&self) -> Option<&str> {
        match &self.payload {
            FeedPayload::Status(status) => status.reblog_id(),
            _ => None,
        }
    }

    pub fn is_loader(&self) -> bool {
        matches!(self.payload, FeedPayload::Loader(_))
    }

    /// The server entity behind this entry; `None` for loader markers
    pub fn item(&self) -> Option<FeedItem> {
        match &self.payload {
            FeedPayload::Status(status) => Some(FeedItem::Status(status.clone())),
            FeedPayload::Notification(notification) => {
                Some(FeedItem::Notification(notification.clone()))
            }
            FeedPayload::Loader(_) => None,
        }
    }
}

impl From<FeedItem> for FeedPayload {
    fn from(item: FeedItem) -> Self {
        match item {
            FeedItem::Status(status) => FeedPayload::Status(status),
            FeedItem::Notification(notification) => FeedPayload::Notification(notification),
        }
    }
}

// =============================================================================
// Intent
// =============================================================================

/// Optimistic mutation applied to the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedIntent {
    Delete,
    Edit,
    Bookmark(bool),
    Favorite(bool),
    Reblog(bool),
    ToggleSensitive(bool),
}

impl FeedIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Edit => "edit",
            Self::Bookmark(_) => "bookmark",
            Self::Favorite(_) => "favorite",
            Self::Reblog(_) => "reblog",
            Self::ToggleSensitive(_) => "toggle_sensitive",
        }
    }
}

impl fmt::Display for FeedIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Apply one mutation to one feed
///
/// A status entity only ever lands in status payloads: its own entry, the
/// original inside a reblog wrapper, or the status a notification refers to.
/// A notification entity only matches a notification with the same id.
///
/// Returns the first affected index, or `None` when no entry matches.
pub fn reconcile(records: &mut Vec<FeedEntry>, entity: &FeedItem, intent: FeedIntent) -> Option<usize> {
    match entity {
        FeedItem::Status(status) => reconcile_status(records, status, intent),
        FeedItem::Notification(notification) => {
            reconcile_notification(records, notification, intent)
        }
    }
}

fn reconcile_status(records: &mut Vec<FeedEntry>, status: &Status, intent: FeedIntent) -> Option<usize> {
    match intent {
        FeedIntent::Delete => {
            let index = position_by_id(records, &status.id)?;
            records.remove(index);
            Some(index)
        }
        FeedIntent::Reblog(reblogged) => {
            // Reblog(true) carries the new wrapper, Reblog(false) the original.
            let original = match (reblogged, status.reblog.as_deref()) {
                (true, Some(original)) => original,
                _ => status,
            };
            // Unwrapping in place keeps indices stable. If the plain original
            // is also in view the list briefly holds that id twice.
            let replaced = position_wrapping(records, &original.id)
                .or_else(|| position_by_id(records, &original.id));
            if let Some(index) = replaced {
                records[index].payload = FeedPayload::Status(status.clone());
            }

            let mut first = replaced;
            for (index, entry) in records.iter_mut().enumerate() {
                if matches!(entry.payload, FeedPayload::Notification(_)) && show_updated(entry, original) {
                    first = Some(first.map_or(index, |first| first.min(index)));
                }
            }
            first
        }
        FeedIntent::Edit
        | FeedIntent::Bookmark(_)
        | FeedIntent::Favorite(_)
        | FeedIntent::ToggleSensitive(_) => {
            let mut first = None;
            for (index, entry) in records.iter_mut().enumerate() {
                if !show_updated(entry, status) {
                    continue;
                }
                if let FeedIntent::ToggleSensitive(revealed) = intent {
                    entry.sensitivity_revealed = revealed;
                }
                first.get_or_insert(index);
            }
            first
        }
    }
}

fn reconcile_notification(
    records: &mut Vec<FeedEntry>,
    notification: &Notification,
    intent: FeedIntent,
) -> Option<usize> {
    let index = records.iter().position(|entry| {
        matches!(&entry.payload, FeedPayload::Notification(shown) if shown.id == notification.id)
    })?;

    match intent {
        FeedIntent::Delete => {
            records.remove(index);
        }
        _ => {
            let entry = &mut records[index];
            entry.payload = FeedPayload::Notification(notification.clone());
            if let FeedIntent::ToggleSensitive(revealed) = intent {
                entry.sensitivity_revealed = revealed;
            }
        }
    }
    Some(index)
}

/// Swap in `status` wherever `entry` shows a status with the same id
///
/// Wrappers and notifications keep their own id; only the inner status
/// changes.
fn show_updated(entry: &mut FeedEntry, status: &Status) -> bool {
    let shown = match &mut entry.payload {
        FeedPayload::Status(shown) if shown.id == status.id => shown,
        FeedPayload::Status(wrapper) => match wrapper.reblog.as_deref_mut() {
            Some(original) if original.id == status.id => original,
            _ => return false,
        },
        FeedPayload::Notification(notification) => match notification.status.as_mut() {
            Some(shown) if shown.id == status.id => shown,
            _ => return false,
        },
        FeedPayload::Loader(_) => return false,
    };
    *shown = status.clone();
    true
}

/// Status entries whose own id is `id`
fn position_by_id(records: &[FeedEntry], id: &str) -> Option<usize> {
    records.iter().position(|entry| match &entry.payload {
        FeedPayload::Status(status) => status.id == id,
        _ => false,
    })
}

fn position_wrapping(records: &[FeedEntry], original_id: &str) -> Option<usize> {
    records
        .iter()
        .position(|entry| entry.wrapped_id() == Some(original_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::NotificationType;
    use crate::service::fixtures::{notification, reblog, status};

    fn home(statuses: Vec<Status>) -> Vec<FeedEntry> {
        statuses
            .into_iter()
            .map(|status| FeedEntry::new(FeedKind::Home, status.into()))
            .collect()
    }

    fn mention(id: &str, subject: Status) -> FeedEntry {
        let notification = Notification {
            status: Some(subject),
            ..notification(id, NotificationType::Mention)
        };
        FeedEntry::new(FeedKind::NotificationsAll, notification.into())
    }

    fn favourited(id: &str) -> Status {
        Status {
            favourited: Some(true),
            favourites_count: 1,
            ..status(id)
        }
    }

    fn ids(records: &[FeedEntry]) -> Vec<&str> {
        records.iter().map(FeedEntry::id).collect()
    }

    #[test]
    fn test_delete_removes_matching_entry() {
        let mut records = home(vec![status("3"), status("2"), status("1")]);
        let index = reconcile(&mut records, &status("2").into(), FeedIntent::Delete);

        assert_eq!(index, Some(1));
        assert_eq!(ids(&records), vec!["3", "1"]);
    }

    #[test]
    fn test_favorite_replaces_payload_and_keeps_revealed_flag() {
        let mut records = home(vec![status("3"), status("2")]);
        records[1].sensitivity_revealed = true;

        let favourited = Status {
            favourited: Some(true),
            favourites_count: 1,
            ..status("2")
        };
        let index = reconcile(&mut records, &favourited.clone().into(), FeedIntent::Favorite(true));

        assert_eq!(index, Some(1));
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].payload, FeedPayload::Status(favourited));
        assert!(records[1].sensitivity_revealed);
    }

    #[test]
    fn test_miss_leaves_records_untouched() {
        let mut records = home(vec![status("3"), status("2")]);
        let before = records.clone();

        for intent in [
            FeedIntent::Delete,
            FeedIntent::Edit,
            FeedIntent::Bookmark(true),
            FeedIntent::Reblog(true),
            FeedIntent::Reblog(false),
        ] {
            assert_eq!(reconcile(&mut records, &status("99").into(), intent), None);
        }
        assert_eq!(records, before);
    }

    #[test]
    fn test_reblog_true_wraps_plain_entry_in_place() {
        let mut records = home(vec![status("3"), status("2"), status("1")]);
        let wrapper = reblog("50", status("2"));

        let index = reconcile(&mut records, &wrapper.into(), FeedIntent::Reblog(true));

        assert_eq!(index, Some(1));
        assert_eq!(records[1].id(), "50");
        assert_eq!(records[1].wrapped_id(), Some("2"));
        assert_eq!(records[1].kind, FeedKind::Home);
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_reblog_true_prefers_entry_already_wrapping_original() {
        // Someone else's reblog of "2" is in view, and so is "2" itself.
        let mut records = home(vec![reblog("40", status("2")), status("2")]);
        let wrapper = reblog("50", status("2"));

        let index = reconcile(&mut records, &wrapper.into(), FeedIntent::Reblog(true));

        assert_eq!(index, Some(0));
        assert_eq!(ids(&records), vec!["50", "2"]);
    }

    #[test]
    fn test_reblog_false_unwraps_and_keeps_revealed_flag() {
        let mut records = home(vec![status("3"), reblog("50", status("2"))]);
        records[1].sensitivity_revealed = true;

        let index = reconcile(&mut records, &status("2").into(), FeedIntent::Reblog(false));

        assert_eq!(index, Some(1));
        assert_eq!(records[1].id(), "2");
        assert_eq!(records[1].wrapped_id(), None);
        assert!(records[1].sensitivity_revealed);
    }

    #[test]
    fn test_reblog_false_falls_back_to_direct_match() {
        let mut records = home(vec![status("2")]);
        let index = reconcile(&mut records, &status("2").into(), FeedIntent::Reblog(false));
        assert_eq!(index, Some(0));
        assert_eq!(ids(&records), vec!["2"]);
    }

    #[test]
    fn test_non_delete_intents_are_idempotent() {
        let intents = [
            (FeedIntent::Edit, FeedItem::from(status("2"))),
            (FeedIntent::Bookmark(true), status("2").into()),
            (FeedIntent::Favorite(false), status("2").into()),
            (FeedIntent::ToggleSensitive(true), status("2").into()),
            (FeedIntent::Reblog(true), reblog("50", status("2")).into()),
            (FeedIntent::Reblog(false), status("2").into()),
        ];

        for (intent, entity) in intents {
            let mut once = home(vec![status("3"), status("2"), status("1")]);
            reconcile(&mut once, &entity, intent);
            let mut twice = once.clone();
            reconcile(&mut twice, &entity, intent);
            assert_eq!(once, twice, "{intent} is not idempotent");
            assert_eq!(twice.len(), 3);
        }
    }

    #[test]
    fn test_status_does_not_match_notification_with_same_id() {
        let mut records = vec![mention("7", status("900"))];
        let before = records.clone();

        for intent in [FeedIntent::Delete, FeedIntent::Bookmark(true), FeedIntent::Edit] {
            assert_eq!(reconcile(&mut records, &status("7").into(), intent), None);
        }
        assert_eq!(records, before);
    }

    #[test]
    fn test_favorite_updates_status_inside_notification() {
        let mut records = vec![mention("7", status("900"))];
        records[0].sensitivity_revealed = true;

        let index = reconcile(&mut records, &favourited("900").into(), FeedIntent::Favorite(true));

        assert_eq!(index, Some(0));
        assert_eq!(records[0].id(), "7");
        assert!(records[0].sensitivity_revealed);
        match &records[0].payload {
            FeedPayload::Notification(notification) => {
                assert_eq!(notification.notification_type, NotificationType::Mention);
                assert_eq!(notification.status, Some(favourited("900")));
            }
            other => panic!("expected a notification, got {other:?}"),
        }
    }

    #[test]
    fn test_notification_entity_matches_only_notifications() {
        let mut records = vec![
            FeedEntry::new(FeedKind::NotificationsAll, status("7").into()),
            mention("7", status("900")),
        ];

        let entity = notification("7", NotificationType::Mention).into();
        let index = reconcile(&mut records, &entity, FeedIntent::Delete);

        assert_eq!(index, Some(1));
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0].payload, FeedPayload::Status(_)));
    }

    #[test]
    fn test_favorite_updates_original_inside_reblog_wrapper() {
        let mut records = home(vec![status("60"), reblog("50", status("2"))]);
        records[1].sensitivity_revealed = true;

        let index = reconcile(&mut records, &favourited("2").into(), FeedIntent::Favorite(true));

        assert_eq!(index, Some(1));
        assert_eq!(ids(&records), vec!["60", "50"]);
        assert_eq!(records[1].wrapped_id(), Some("2"));
        assert!(records[1].sensitivity_revealed);
        match &records[1].payload {
            FeedPayload::Status(wrapper) => {
                assert_eq!(wrapper.reblog.as_deref(), Some(&favourited("2")));
            }
            other => panic!("expected a status, got {other:?}"),
        }
    }

    #[test]
    fn test_bookmark_updates_every_entry_showing_the_status() {
        let mut records = home(vec![reblog("50", status("2")), status("2")]);
        let bookmarked = Status {
            bookmarked: Some(true),
            ..status("2")
        };

        let index = reconcile(&mut records, &bookmarked.clone().into(), FeedIntent::Bookmark(true));

        assert_eq!(index, Some(0));
        assert_eq!(ids(&records), vec!["50", "2"]);
        assert_eq!(records[1].payload, FeedPayload::Status(bookmarked));
    }

    #[test]
    fn test_toggle_sensitive_sets_revealed_flag() {
        let mut records = home(vec![status("3"), status("2")]);

        reconcile(&mut records, &status("2").into(), FeedIntent::ToggleSensitive(true));
        assert!(records[1].sensitivity_revealed);
        assert!(!records[0].sensitivity_revealed);

        reconcile(&mut records, &status("2").into(), FeedIntent::ToggleSensitive(false));
        assert!(!records[1].sensitivity_revealed);
    }

    #[test]
    fn test_reblog_false_unwraps_in_place_even_when_original_is_in_view() {
        let mut records = home(vec![reblog("50", status("2")), status("2")]);

        let index = reconcile(&mut records, &status("2").into(), FeedIntent::Reblog(false));

        // Length and order win over uniqueness until the next reload
        assert_eq!(index, Some(0));
        assert_eq!(ids(&records), vec!["2", "2"]);
    }

    #[test]
    fn test_reblog_refreshes_notification_subject() {
        let mut records = vec![mention("7", status("2"))];
        let wrapper = Status {
            reblog: Some(Box::new(Status {
                reblogged: Some(true),
                ..status("2")
            })),
            ..status("50")
        };

        let index = reconcile(&mut records, &wrapper.into(), FeedIntent::Reblog(true));

        assert_eq!(index, Some(0));
        assert_eq!(records[0].id(), "7");
        match &records[0].payload {
            FeedPayload::Notification(notification) => {
                let subject = notification.status.as_ref().unwrap();
                assert_eq!(subject.id, "2");
                assert_eq!(subject.reblogged, Some(true));
            }
            other => panic!("expected a notification, got {other:?}"),
        }
    }

    #[test]
    fn test_loader_marker_has_no_server_entity() {
        let loader = FeedEntry::loader(FeedKind::NotificationsAll);
        assert!(loader.is_loader());
        assert!(loader.id().starts_with("loader-"));
        assert_eq!(loader.item(), None);
        assert_eq!(loader.wrapped_id(), None);
    }
}
