//! Store sessions
//!
//! A session is a unit of work against the persistent store: it stages
//! inserts, property updates and deletes in memory and writes them in one
//! transaction on `save()`. Every save publishes exactly one change
//! notification for the saving session, then merges the saved values into
//! every other live session that automatically merges changes.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::database::StoreInner;
use super::observer::ChangeNotification;
use crate::error::StoreError;
use crate::metrics::STORE_SAVES_TOTAL;

/// Property bag of a managed object
pub type Properties = serde_json::Map<String, Value>;

// =============================================================================
// Identifiers
// =============================================================================

/// Identity of a stored object: entity name plus key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    pub entity: String,
    pub key: String,
}

impl ObjectId {
    pub fn new(entity: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.key)
    }
}

/// Handle of a registered session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

// =============================================================================
// Managed object
// =============================================================================

/// A materialized object together with the session that produced it
///
/// The session is referenced by id; observers resolve it through the
/// store's session registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedObject {
    id: ObjectId,
    session: Option<SessionId>,
    properties: Properties,
}

impl ManagedObject {
    /// An object not attached to any session
    pub fn detached(id: ObjectId, properties: Properties) -> Self {
        Self {
            id,
            session: None,
            properties,
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

// =============================================================================
// Options
// =============================================================================

/// How locally changed properties combine with the stored row on save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Locally changed properties overwrite the stored values; properties
    /// this session did not touch keep whatever the store holds
    PropertyObjectTrump,
    /// A locally changed property is dropped when the stored value moved
    /// since this session last saw the object
    PropertyStoreTrump,
}

/// Session behavior
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub label: &'static str,
    pub merge_policy: MergePolicy,
    pub automatically_merges_changes: bool,
    pub undo_tracking: bool,
}

impl SessionOptions {
    /// Primary session feeding the UI
    pub fn view() -> Self {
        Self {
            label: "view",
            merge_policy: MergePolicy::PropertyObjectTrump,
            automatically_merges_changes: true,
            undo_tracking: true,
        }
    }

    /// Short-lived session for one unit of background work
    pub fn background() -> Self {
        Self {
            label: "background",
            merge_policy: MergePolicy::PropertyObjectTrump,
            automatically_merges_changes: false,
            undo_tracking: false,
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

type Snapshots = Arc<Mutex<HashMap<ObjectId, Properties>>>;

struct RegisteredSession {
    options: SessionOptions,
    snapshots: Snapshots,
}

/// Live sessions keyed by id
#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, RegisteredSession>>,
}

impl SessionRegistry {
    fn register(&self, id: SessionId, options: SessionOptions, snapshots: Snapshots) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, RegisteredSession { options, snapshots });
    }

    fn deregister(&self, id: SessionId) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub(crate) fn contains(&self, id: SessionId) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub(crate) fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    /// Drop every cached row snapshot, e.g. after the store was rebuilt
    pub(crate) fn invalidate_all(&self) {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        for session in sessions.values() {
            session
                .snapshots
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    /// Fold one saved write cycle into every other auto-merging session
    ///
    /// Returns one notification per session that held an affected object.
    fn merge_saved(
        &self,
        origin: SessionId,
        saved: &HashMap<ObjectId, Properties>,
        deleted: &BTreeSet<ObjectId>,
    ) -> Vec<ChangeNotification> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let mut notifications = Vec::new();

        for (id, session) in sessions.iter() {
            if *id == origin || !session.options.automatically_merges_changes {
                continue;
            }

            let mut snapshots = session
                .snapshots
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let mut notification = ChangeNotification::for_session(*id);

            for (object_id, properties) in saved {
                if let Some(snapshot) = snapshots.get_mut(object_id) {
                    *snapshot = properties.clone();
                    notification.refreshed.insert(object_id.clone());
                }
            }
            for object_id in deleted {
                if snapshots.remove(object_id).is_some() {
                    notification.deleted.insert(object_id.clone());
                }
            }

            if !notification.is_empty() {
                notifications.push(notification);
            }
        }

        notifications
    }
}

// =============================================================================
// Session
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum PendingChange {
    Insert(Properties),
    Update(Properties),
    Delete,
}

#[derive(Debug)]
struct UndoStep {
    id: ObjectId,
    previous: Option<PendingChange>,
}

/// A unit of work against the persistent store
///
/// Sessions are not shared: background work gets a fresh one per task and
/// drops it when done. Dropping a session deregisters it.
pub struct Session {
    id: SessionId,
    options: SessionOptions,
    store: Arc<StoreInner>,
    snapshots: Snapshots,
    pending: BTreeMap<ObjectId, PendingChange>,
    undo_stack: Option<Vec<UndoStep>>,
}

impl Session {
    pub(crate) fn open(store: Arc<StoreInner>, id: SessionId, options: SessionOptions) -> Self {
        let snapshots: Snapshots = Arc::default();
        store
            .registry
            .register(id, options, Arc::clone(&snapshots));
        tracing::debug!(session = %id, label = options.label, "Session opened");

        Self {
            id,
            options,
            store,
            snapshots,
            pending: BTreeMap::new(),
            undo_stack: options.undo_tracking.then(Vec::new),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Fetch one object, with this session's unsaved changes applied
    pub async fn fetch(&mut self, id: &ObjectId) -> Result<Option<ManagedObject>, StoreError> {
        match self.pending.get(id) {
            Some(PendingChange::Delete) => return Ok(None),
            Some(PendingChange::Insert(properties)) => {
                return Ok(Some(self.materialize(id.clone(), properties.clone())));
            }
            _ => {}
        }

        let pool = self.store.pool().await?;
        let raw = sqlx::query_scalar::<_, String>(
            "SELECT properties FROM objects WHERE entity = ? AND key = ?",
        )
        .bind(&id.entity)
        .bind(&id.key)
        .fetch_optional(&pool)
        .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let stored: Properties = serde_json::from_str(&raw)?;
        self.remember(id.clone(), stored.clone());

        Ok(Some(self.materialize(id.clone(), self.overlay(id, stored))))
    }

    /// Fetch every object of an entity, ordered by key
    pub async fn fetch_all(&mut self, entity: &str) -> Result<Vec<ManagedObject>, StoreError> {
        let pool = self.store.pool().await?;
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT key, properties FROM objects WHERE entity = ? ORDER BY key",
        )
        .bind(entity)
        .fetch_all(&pool)
        .await?;

        let mut objects = BTreeMap::new();
        for (key, raw) in rows {
            let id = ObjectId::new(entity, key);
            if matches!(self.pending.get(&id), Some(PendingChange::Delete)) {
                continue;
            }
            let stored: Properties = serde_json::from_str(&raw)?;
            self.remember(id.clone(), stored.clone());
            let properties = self.overlay(&id, stored);
            objects.insert(id, properties);
        }

        for (id, change) in &self.pending {
            if let PendingChange::Insert(properties) = change {
                if id.entity == entity {
                    objects.insert(id.clone(), properties.clone());
                }
            }
        }

        Ok(objects
            .into_iter()
            .map(|(id, properties)| self.materialize(id, properties))
            .collect())
    }

    /// Stage a new object (replaces the row if the key already exists)
    pub fn insert(&mut self, id: ObjectId, properties: Properties) -> ManagedObject {
        self.stage(id.clone(), Some(PendingChange::Insert(properties.clone())));
        self.materialize(id, properties)
    }

    /// Stage a single property change
    pub fn set(&mut self, id: &ObjectId, name: &str, value: Value) -> Result<(), StoreError> {
        let next = match self.pending.get(id) {
            Some(PendingChange::Delete) => {
                return Err(StoreError::ObjectNotFound(id.to_string()));
            }
            Some(PendingChange::Insert(properties)) => {
                let mut properties = properties.clone();
                properties.insert(name.to_string(), value);
                PendingChange::Insert(properties)
            }
            Some(PendingChange::Update(changed)) => {
                let mut changed = changed.clone();
                changed.insert(name.to_string(), value);
                PendingChange::Update(changed)
            }
            None => {
                let mut changed = Properties::new();
                changed.insert(name.to_string(), value);
                PendingChange::Update(changed)
            }
        };
        self.stage(id.clone(), Some(next));
        Ok(())
    }

    /// Stage a delete
    pub fn delete(&mut self, id: &ObjectId) {
        let next = match self.pending.get(id) {
            Some(PendingChange::Insert(_)) => None,
            _ => Some(PendingChange::Delete),
        };
        self.stage(id.clone(), next);
    }

    /// Revert the most recent staged change
    ///
    /// Returns false when undo tracking is off or nothing is left to undo.
    pub fn undo(&mut self) -> bool {
        let Some(step) = self.undo_stack.as_mut().and_then(Vec::pop) else {
            return false;
        };
        match step.previous {
            Some(change) => self.pending.insert(step.id, change),
            None => self.pending.remove(&step.id),
        };
        true
    }

    /// Discard every staged change
    pub fn rollback(&mut self) {
        self.pending.clear();
        if let Some(stack) = self.undo_stack.as_mut() {
            stack.clear();
        }
    }

    /// Write staged changes in one transaction
    ///
    /// Returns the published notification, or `None` when there was nothing
    /// to save.
    pub async fn save(&mut self) -> Result<Option<Arc<ChangeNotification>>, StoreError> {
        if self.pending.is_empty() {
            return Ok(None);
        }

        let pool = self.store.pool().await?;
        let mut tx = pool.begin().await?;
        let now = Utc::now();

        let mut notification = ChangeNotification::for_session(self.id);
        let mut saved: HashMap<ObjectId, Properties> = HashMap::new();

        for (id, change) in &self.pending {
            match change {
                PendingChange::Insert(properties) => {
                    sqlx::query(
                        r#"
                        INSERT INTO objects (entity, key, properties, updated_at)
                        VALUES (?, ?, ?, ?)
                        ON CONFLICT(entity, key) DO UPDATE SET
                            properties = excluded.properties,
                            updated_at = excluded.updated_at
                        "#,
                    )
                    .bind(&id.entity)
                    .bind(&id.key)
                    .bind(serde_json::to_string(properties)?)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;

                    notification.inserted.insert(id.clone());
                    saved.insert(id.clone(), properties.clone());
                }
                PendingChange::Update(changed) => {
                    let raw = sqlx::query_scalar::<_, String>(
                        "SELECT properties FROM objects WHERE entity = ? AND key = ?",
                    )
                    .bind(&id.entity)
                    .bind(&id.key)
                    .fetch_optional(&mut *tx)
                    .await?;

                    let Some(raw) = raw else {
                        tracing::warn!(
                            session = %self.id,
                            object = %id,
                            "Object was deleted before save; dropping update"
                        );
                        continue;
                    };

                    let stored: Properties = serde_json::from_str(&raw)?;
                    let snapshot = self
                        .snapshots
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get(id)
                        .cloned();
                    let merged = merge_properties(
                        self.options.merge_policy,
                        stored,
                        snapshot.as_ref(),
                        changed,
                    );

                    sqlx::query(
                        "UPDATE objects SET properties = ?, updated_at = ? WHERE entity = ? AND key = ?",
                    )
                    .bind(serde_json::to_string(&merged)?)
                    .bind(now)
                    .bind(&id.entity)
                    .bind(&id.key)
                    .execute(&mut *tx)
                    .await?;

                    notification.updated.insert(id.clone());
                    saved.insert(id.clone(), merged);
                }
                PendingChange::Delete => {
                    let result = sqlx::query("DELETE FROM objects WHERE entity = ? AND key = ?")
                        .bind(&id.entity)
                        .bind(&id.key)
                        .execute(&mut *tx)
                        .await?;
                    if result.rows_affected() > 0 {
                        notification.deleted.insert(id.clone());
                    }
                }
            }
        }

        tx.commit().await?;

        {
            let mut snapshots = self
                .snapshots
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for (id, properties) in &saved {
                snapshots.insert(id.clone(), properties.clone());
            }
            for id in &notification.deleted {
                snapshots.remove(id);
            }
        }
        self.rollback();

        STORE_SAVES_TOTAL
            .with_label_values(&[self.options.label])
            .inc();
        tracing::debug!(
            session = %self.id,
            inserted = notification.inserted.len(),
            updated = notification.updated.len(),
            deleted = notification.deleted.len(),
            "Session saved"
        );

        let merged = self
            .store
            .registry
            .merge_saved(self.id, &saved, &notification.deleted);

        let notification = Arc::new(notification);
        self.store.publish_change(Arc::clone(&notification));
        for merged in merged {
            self.store.publish_change(Arc::new(merged));
        }

        Ok(Some(notification))
    }

    fn stage(&mut self, id: ObjectId, next: Option<PendingChange>) {
        let previous = match next {
            Some(change) => self.pending.insert(id.clone(), change),
            None => self.pending.remove(&id),
        };
        if let Some(stack) = self.undo_stack.as_mut() {
            stack.push(UndoStep { id, previous });
        }
    }

    fn remember(&self, id: ObjectId, properties: Properties) {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, properties);
    }

    fn overlay(&self, id: &ObjectId, mut properties: Properties) -> Properties {
        if let Some(PendingChange::Update(changed)) = self.pending.get(id) {
            for (name, value) in changed {
                properties.insert(name.clone(), value.clone());
            }
        }
        properties
    }

    fn materialize(&self, id: ObjectId, properties: Properties) -> ManagedObject {
        ManagedObject {
            id,
            session: Some(self.id),
            properties,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.store.registry.deregister(self.id);
        if !self.pending.is_empty() {
            tracing::debug!(
                session = %self.id,
                pending = self.pending.len(),
                "Session dropped with unsaved changes"
            );
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Combine a stored row with locally changed properties
fn merge_properties(
    policy: MergePolicy,
    stored: Properties,
    snapshot: Option<&Properties>,
    changed: &Properties,
) -> Properties {
    let mut merged = stored;
    for (name, value) in changed {
        let store_moved = match (policy, snapshot) {
            (MergePolicy::PropertyStoreTrump, Some(snapshot)) => {
                snapshot.get(name) != merged.get(name)
            }
            _ => false,
        };
        if !store_moved {
            merged.insert(name.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_property_object_trump_keeps_untouched_store_values() {
        let stored = props(json!({"title": "remote", "muted": true}));
        let snapshot = props(json!({"title": "old", "muted": false}));
        let changed = props(json!({"title": "local"}));

        let merged = merge_properties(
            MergePolicy::PropertyObjectTrump,
            stored,
            Some(&snapshot),
            &changed,
        );

        assert_eq!(merged, props(json!({"title": "local", "muted": true})));
    }

    #[test]
    fn test_property_store_trump_keeps_moved_store_values() {
        let stored = props(json!({"title": "remote", "muted": false}));
        let snapshot = props(json!({"title": "old", "muted": false}));
        let changed = props(json!({"title": "local", "muted": true}));

        let merged = merge_properties(
            MergePolicy::PropertyStoreTrump,
            stored,
            Some(&snapshot),
            &changed,
        );

        assert_eq!(merged, props(json!({"title": "remote", "muted": true})));
    }

    #[test]
    fn test_view_and_background_options() {
        let view = SessionOptions::view();
        assert_eq!(view.merge_policy, MergePolicy::PropertyObjectTrump);
        assert!(view.automatically_merges_changes);
        assert!(view.undo_tracking);

        let background = SessionOptions::background();
        assert!(!background.undo_tracking);
        assert!(!background.automatically_merges_changes);
    }
}
