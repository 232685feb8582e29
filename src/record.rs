//! Record handles and their persistence lifecycle.
//!
//! A [`Record`] is a cheap, cloneable handle. Every clone points at the same
//! underlying record, so identity is compared with [`Record::ptr_eq`]. Only
//! the [`Store`](crate::store::Store) mutates records; the read side is public.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use serde_json::{Map, Value};
use tokio::sync::{watch, Mutex as AsyncMutex};
use uuid::Uuid;

use crate::adapter::AdapterError;
use crate::schema::{ModelSchema, ModelType};
use crate::store::StoreError;

/// Record identity: locally generated until the server assigns one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Id {
    Pending(Uuid),
    Server(String),
}

impl Id {
    pub fn pending() -> Self {
        Id::Pending(Uuid::new_v4())
    }

    pub fn server(id: impl Into<String>) -> Self {
        Id::Server(id.into())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Id::Pending(_))
    }

    pub fn as_server(&self) -> Option<&str> {
        match self {
            Id::Server(id) => Some(id),
            Id::Pending(_) => None,
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Pending(uuid) => write!(f, "pending:{}", uuid),
            Id::Server(id) => f.write_str(id),
        }
    }
}

/// Identity-map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub model: ModelType,
    pub id: Id,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistState {
    /// Created locally, never saved.
    New,
    /// Placeholder waiting for a fetch.
    Loading,
    Loaded,
    Saving,
    Saved,
    /// Deletion confirmed by the server.
    Deleted,
    /// Last fetch or commit failed; see [`Record::last_error`].
    Error,
}

impl PersistState {
    pub fn is_busy(self) -> bool {
        matches!(self, PersistState::Loading | PersistState::Saving)
    }
}

/// Attribute values plus belongs_to links.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Snapshot {
    pub attributes: Map<String, Value>,
    pub links: BTreeMap<String, Option<Id>>,
}

pub(crate) struct RecordData {
    pub id: Id,
    pub current: Snapshot,
    /// Last state confirmed by the server.
    pub canonical: Snapshot,
    pub changed: BTreeSet<String>,
    pub persisted: bool,
    pub marked_deleted: bool,
    pub rejected: Option<Snapshot>,
    pub last_error: Option<AdapterError>,
}

#[derive(Clone)]
pub struct Record {
    inner: Arc<RecordInner>,
}

struct RecordInner {
    schema: Arc<ModelSchema>,
    data: RwLock<RecordData>,
    state: watch::Sender<PersistState>,
    commit_lock: AsyncMutex<()>,
}

impl Record {
    fn with(schema: Arc<ModelSchema>, data: RecordData, state: PersistState) -> Self {
        let (state, _) = watch::channel(state);
        Self {
            inner: Arc::new(RecordInner {
                schema,
                data: RwLock::new(data),
                state,
                commit_lock: AsyncMutex::new(()),
            }),
        }
    }

    pub(crate) fn placeholder(schema: Arc<ModelSchema>, id: Id) -> Self {
        let data = RecordData {
            id,
            current: Snapshot::default(),
            canonical: Snapshot::default(),
            changed: BTreeSet::new(),
            persisted: true,
            marked_deleted: false,
            rejected: None,
            last_error: None,
        };
        Self::with(schema, data, PersistState::Loading)
    }

    pub(crate) fn loaded(schema: Arc<ModelSchema>, id: Id, values: Snapshot) -> Self {
        let data = RecordData {
            id,
            current: values.clone(),
            canonical: values,
            changed: BTreeSet::new(),
            persisted: true,
            marked_deleted: false,
            rejected: None,
            last_error: None,
        };
        Self::with(schema, data, PersistState::Loaded)
    }

    pub(crate) fn new_local(schema: Arc<ModelSchema>, values: Snapshot) -> Self {
        let data = RecordData {
            id: Id::pending(),
            current: values,
            canonical: Snapshot::default(),
            changed: BTreeSet::new(),
            persisted: false,
            marked_deleted: false,
            rejected: None,
            last_error: None,
        };
        Self::with(schema, data, PersistState::New)
    }

    pub fn model(&self) -> &ModelType {
        self.inner.schema.name()
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.inner.schema
    }

    pub fn id(&self) -> Id {
        self.inner.data.read().id.clone()
    }

    pub fn server_id(&self) -> Option<String> {
        self.inner.data.read().id.as_server().map(str::to_string)
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            model: self.model().clone(),
            id: self.id(),
        }
    }

    pub fn state(&self) -> PersistState {
        *self.inner.state.borrow()
    }

    /// True until the server has acknowledged a create.
    pub fn is_new(&self) -> bool {
        !self.inner.data.read().persisted
    }

    pub fn is_dirty(&self) -> bool {
        let data = self.inner.data.read();
        !data.persisted || data.marked_deleted || !data.changed.is_empty()
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.data.read().marked_deleted || self.state() == PersistState::Deleted
    }

    pub fn get(&self, attribute: &str) -> Option<Value> {
        self.inner.data.read().current.attributes.get(attribute).cloned()
    }

    pub fn get_str(&self, attribute: &str) -> Option<String> {
        self.get(attribute).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn attributes(&self) -> Map<String, Value> {
        self.inner.data.read().current.attributes.clone()
    }

    /// Owner id stored for a belongs_to relationship.
    pub fn belongs_to_id(&self, relationship: &str) -> Option<Id> {
        self.inner
            .data
            .read()
            .current
            .links
            .get(relationship)
            .cloned()
            .flatten()
    }

    /// Attribute and relationship names with unsaved edits.
    pub fn changed_fields(&self) -> Vec<String> {
        self.inner.data.read().changed.iter().cloned().collect()
    }

    pub fn last_error(&self) -> Option<AdapterError> {
        self.inner.data.read().last_error.clone()
    }

    /// Edits reverted by the last failed commit, keyed by attribute or
    /// relationship name.
    pub fn rejected_changes(&self) -> Option<Map<String, Value>> {
        let data = self.inner.data.read();
        let rejected = data.rejected.as_ref()?;
        let mut out = rejected.attributes.clone();
        for (name, id) in &rejected.links {
            let value = match id {
                Some(id) => Value::String(id.to_string()),
                None => Value::Null,
            };
            out.insert(name.clone(), value);
        }
        Some(out)
    }

    pub fn ptr_eq(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Wait until the record is neither loading nor saving.
    pub async fn wait_idle(&self) -> PersistState {
        let mut rx = self.inner.state.subscribe();
        let state = rx.wait_for(|s| !s.is_busy()).await.map(|s| *s);
        state.unwrap_or_else(|_| self.state())
    }

    /// Wait for in-flight work and report the stored error if it failed.
    pub async fn settled(&self) -> Result<(), AdapterError> {
        match self.wait_idle().await {
            PersistState::Error => Err(self
                .last_error()
                .unwrap_or_else(|| AdapterError::NetworkFailure("unknown failure".to_string()))),
            _ => Ok(()),
        }
    }

    pub(crate) fn set_state(&self, state: PersistState) {
        self.inner.state.send_replace(state);
    }

    pub(crate) fn commit_lock(&self) -> &AsyncMutex<()> {
        &self.inner.commit_lock
    }

    pub(crate) fn data(&self) -> RwLockReadGuard<'_, RecordData> {
        self.inner.data.read()
    }

    fn ensure_live(&self) -> Result<(), StoreError> {
        if self.is_deleted() {
            return Err(StoreError::RecordDeleted {
                key: self.key().to_string(),
            });
        }
        Ok(())
    }

    /// Returns whether the stored value changed.
    pub(crate) fn write_attribute(&self, name: &str, value: Value) -> Result<bool, StoreError> {
        self.ensure_live()?;
        let def = self
            .schema()
            .attribute(name)
            .ok_or_else(|| StoreError::UnknownAttribute {
                model: self.model().to_string(),
                attribute: name.to_string(),
            })?;
        if !def.kind.accepts(&value) {
            return Err(StoreError::TypeMismatch {
                model: self.model().to_string(),
                attribute: name.to_string(),
                expected: def.kind.name(),
                value: value.to_string(),
            });
        }

        let mut data = self.inner.data.write();
        if data.current.attributes.get(name) == Some(&value) {
            return Ok(false);
        }
        let reverted = data.persisted && data.canonical.attributes.get(name) == Some(&value);
        data.current.attributes.insert(name.to_string(), value);
        if reverted {
            data.changed.remove(name);
        } else {
            data.changed.insert(name.to_string());
        }
        Ok(true)
    }

    pub(crate) fn write_link(&self, relationship: &str, owner: Option<Id>) -> Result<bool, StoreError> {
        self.ensure_live()?;
        let mut data = self.inner.data.write();
        if data.current.links.get(relationship).cloned().flatten() == owner {
            return Ok(false);
        }
        let reverted =
            data.persisted && data.canonical.links.get(relationship).cloned().flatten() == owner;
        data.current.links.insert(relationship.to_string(), owner);
        if reverted {
            data.changed.remove(relationship);
        } else {
            data.changed.insert(relationship.to_string());
        }
        Ok(true)
    }

    pub(crate) fn mark_deleted(&self) -> bool {
        let mut data = self.inner.data.write();
        !std::mem::replace(&mut data.marked_deleted, true)
    }

    pub(crate) fn rollback(&self) {
        let mut data = self.inner.data.write();
        if data.persisted {
            data.current = data.canonical.clone();
            data.changed.clear();
        }
        data.marked_deleted = false;
        data.rejected = None;
        data.last_error = None;
    }

    /// Merge server values; keys with unsaved local edits keep the local value.
    /// Links to owners that have no server id yet are kept as well.
    pub(crate) fn merge_server(&self, values: Snapshot) {
        let mut data = self.inner.data.write();
        for (name, value) in values.attributes {
            if !data.changed.contains(&name) {
                data.current.attributes.insert(name.clone(), value.clone());
            }
            data.canonical.attributes.insert(name, value);
        }
        for (name, owner) in values.links {
            // A pending owner goes out as null; the echoed null must not
            // drop the link before the owner is saved.
            let pending = matches!(data.current.links.get(&name), Some(Some(Id::Pending(_))));
            if !data.changed.contains(&name) && !(pending && owner.is_none()) {
                data.current.links.insert(name.clone(), owner.clone());
            }
            data.canonical.links.insert(name, owner);
        }
    }

    pub(crate) fn assign_id(&self, id: Id) {
        self.inner.data.write().id = id;
    }

    /// Point links aimed at `from` to `to`; returns whether anything changed.
    ///
    /// A pending owner is written as `null`, so if this record was already
    /// saved with such a link the server holds no owner and the relationship
    /// becomes dirty again.
    pub(crate) fn rewrite_link(&self, from: &Id, to: &Id) -> bool {
        let mut data = self.inner.data.write();
        let data = &mut *data;
        let mut touched = Vec::new();
        for (name, owner) in data.current.links.iter_mut() {
            if owner.as_ref() == Some(from) {
                *owner = Some(to.clone());
                touched.push(name.clone());
            }
        }
        for name in &touched {
            if let Some(saved) = data.canonical.links.get_mut(name) {
                if saved.as_ref() == Some(from) {
                    *saved = None;
                }
            }
            if data.persisted {
                data.changed.insert(name.clone());
            }
        }
        !touched.is_empty()
    }

    /// Values about to be written: everything for a new record, the
    /// changed fields otherwise.
    pub(crate) fn begin_commit(&self) -> Snapshot {
        let data = self.inner.data.read();
        if !data.persisted {
            return data.current.clone();
        }
        let mut sent = Snapshot::default();
        for name in &data.changed {
            if let Some(value) = data.current.attributes.get(name) {
                sent.attributes.insert(name.clone(), value.clone());
            } else if let Some(owner) = data.current.links.get(name) {
                sent.links.insert(name.clone(), owner.clone());
            }
        }
        sent
    }

    /// Fields edited again while the write was in flight stay dirty.
    pub(crate) fn commit_succeeded(&self, sent: &Snapshot) {
        let mut data = self.inner.data.write();
        data.persisted = true;
        for (name, value) in &sent.attributes {
            data.canonical.attributes.insert(name.clone(), value.clone());
            if data.current.attributes.get(name) == Some(value) {
                data.changed.remove(name);
            }
        }
        for (name, owner) in &sent.links {
            data.canonical.links.insert(name.clone(), owner.clone());
            if data.current.links.get(name) == Some(owner) {
                data.changed.remove(name);
            }
        }
        data.rejected = None;
        data.last_error = None;
    }

    /// Revert the sent edits to the last valid values and keep them
    /// available through [`Record::rejected_changes`].
    pub(crate) fn commit_failed(&self, sent: &Snapshot, err: AdapterError) {
        let mut data = self.inner.data.write();
        let data = &mut *data;
        if data.persisted {
            for (name, value) in &sent.attributes {
                if data.current.attributes.get(name) != Some(value) {
                    continue;
                }
                match data.canonical.attributes.get(name) {
                    Some(original) => {
                        data.current.attributes.insert(name.clone(), original.clone());
                    }
                    None => {
                        data.current.attributes.remove(name);
                    }
                }
                data.changed.remove(name);
            }
            for (name, owner) in &sent.links {
                if data.current.links.get(name) != Some(owner) {
                    continue;
                }
                let original = data.canonical.links.get(name).cloned().flatten();
                data.current.links.insert(name.clone(), original);
                data.changed.remove(name);
            }
            data.rejected = Some(sent.clone());
        }
        data.marked_deleted = false;
        data.last_error = Some(err);
    }

    pub(crate) fn record_error(&self, err: AdapterError) {
        self.inner.data.write().last_error = Some(err);
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", self.model())
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
