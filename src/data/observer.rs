//! Change observation
//!
//! Turns the store's typed event channel into per-object and per-session
//! streams. One write cycle yields at most one stream item; items carry a
//! classification and the notification, never a diff, so consumers re-read
//! the object after an event.

use futures::Stream;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::BroadcastStream;

use super::database::StoreInner;
use super::session::{ManagedObject, ObjectId, SessionId};
use crate::error::ObserveError;

// =============================================================================
// Events
// =============================================================================

/// Events raised by one persistent store instance
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// The store finished loading (initially, after recovery or a rebuild)
    Loaded,
    /// Objects visible to one session changed
    ObjectsDidChange(Arc<ChangeNotification>),
}

impl StoreEvent {
    pub fn into_change_notification(self) -> Result<Arc<ChangeNotification>, ObserveError> {
        match self {
            StoreEvent::ObjectsDidChange(notification) => Ok(notification),
            _ => Err(ObserveError::NotAChangeNotification),
        }
    }
}

/// Objects affected by one write cycle, as seen by one session
///
/// `updated` holds rows this session saved itself; `refreshed` holds rows
/// merged in from another session's save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub session: SessionId,
    pub inserted: BTreeSet<ObjectId>,
    pub updated: BTreeSet<ObjectId>,
    pub deleted: BTreeSet<ObjectId>,
    pub refreshed: BTreeSet<ObjectId>,
    pub invalidated: BTreeSet<ObjectId>,
    pub invalidated_all: bool,
}

impl ChangeNotification {
    pub fn for_session(session: SessionId) -> Self {
        Self {
            session,
            inserted: BTreeSet::new(),
            updated: BTreeSet::new(),
            deleted: BTreeSet::new(),
            refreshed: BTreeSet::new(),
            invalidated: BTreeSet::new(),
            invalidated_all: false,
        }
    }

    /// Every object of the session is gone, e.g. after a store rebuild
    pub fn all_invalidated(session: SessionId) -> Self {
        Self {
            invalidated_all: true,
            ..Self::for_session(session)
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.invalidated_all
            && self.inserted.is_empty()
            && self.updated.is_empty()
            && self.deleted.is_empty()
            && self.refreshed.is_empty()
            && self.invalidated.is_empty()
    }

    /// Classify what this write cycle did to `id`, if anything
    pub fn classify(&self, id: &ObjectId) -> Option<ChangeKind> {
        if self.invalidated_all || self.deleted.contains(id) || self.invalidated.contains(id) {
            Some(ChangeKind::Deleted)
        } else if self.updated.contains(id) || self.refreshed.contains(id) {
            Some(ChangeKind::Updated)
        } else {
            None
        }
    }

    /// Every classified object, deletes first
    pub fn classified(&self) -> Vec<(ObjectId, ChangeKind)> {
        let deleted = self
            .deleted
            .iter()
            .chain(&self.invalidated)
            .map(|id| (id.clone(), ChangeKind::Deleted));
        let updated = self
            .updated
            .iter()
            .chain(&self.refreshed)
            .filter(|id| !self.deleted.contains(*id) && !self.invalidated.contains(*id))
            .map(|id| (id.clone(), ChangeKind::Updated));
        deleted.chain(updated).collect()
    }
}

/// Classification of a change to one object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Deleted or invalidated
    Deleted,
    /// Updated or refreshed
    Updated,
}

/// Stream item for a watched object
#[derive(Debug, Clone)]
pub struct ObjectChange {
    pub kind: ChangeKind,
    pub notification: Arc<ChangeNotification>,
}

/// Stream item for a watched session: one per write cycle
#[derive(Debug, Clone)]
pub struct SessionChanges {
    pub objects: Vec<(ObjectId, ChangeKind)>,
    pub invalidated_all: bool,
    pub notification: Arc<ChangeNotification>,
}

// =============================================================================
// Observer
// =============================================================================

/// Builds observation streams over one store's events
#[derive(Clone)]
pub struct ChangeObserver {
    store: Arc<StoreInner>,
}

impl ChangeObserver {
    pub(crate) fn new(store: Arc<StoreInner>) -> Self {
        Self { store }
    }

    /// Watch one object
    ///
    /// Fails immediately when the object is detached or its session is gone.
    pub fn observe_object(
        &self,
        object: &ManagedObject,
    ) -> Result<impl Stream<Item = Result<ObjectChange, ObserveError>> + Send + Unpin + 'static, ObserveError>
    {
        let session = object.session().ok_or(ObserveError::NoOwningSession)?;
        if !self.store.registry.contains(session) {
            return Err(ObserveError::NoOwningSession);
        }
        let id = object.id().clone();

        Ok(self.notifications_for(session).filter_map(move |item| match item {
            Err(error) => Some(Err(error)),
            Ok(notification) => notification.classify(&id).map(|kind| {
                Ok(ObjectChange {
                    kind,
                    notification,
                })
            }),
        }))
    }

    /// Watch every object a session sees change
    pub fn observe_session(
        &self,
        session: SessionId,
    ) -> Result<impl Stream<Item = Result<SessionChanges, ObserveError>> + Send + Unpin + 'static, ObserveError>
    {
        if !self.store.registry.contains(session) {
            return Err(ObserveError::NoOwningSession);
        }

        Ok(self.notifications_for(session).filter_map(|item| match item {
            Err(error) => Some(Err(error)),
            Ok(notification) => {
                let objects = notification.classified();
                if objects.is_empty() && !notification.invalidated_all {
                    return None;
                }
                Some(Ok(SessionChanges {
                    objects,
                    invalidated_all: notification.invalidated_all,
                    notification,
                }))
            }
        }))
    }

    fn notifications_for(
        &self,
        session: SessionId,
    ) -> impl Stream<Item = Result<Arc<ChangeNotification>, ObserveError>> + Send + Unpin + 'static
    {
        let receiver: broadcast::Receiver<StoreEvent> = self.store.subscribe();
        BroadcastStream::new(receiver).filter_map(move |item| match item {
            Err(error) => Some(Err(ObserveError::from(error))),
            Ok(event) => match event.into_change_notification() {
                Ok(notification) if notification.session == session => Some(Ok(notification)),
                Ok(_) | Err(ObserveError::NotAChangeNotification) => None,
                Err(error) => Some(Err(error)),
            },
        })
    }
}
