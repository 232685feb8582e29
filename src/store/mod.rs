//! Identity-mapped record store.
//!
//! The store is the only place records are created, merged or removed.
//! Every path that binds a server id to a record goes through
//! [`Store::materialize`] or [`Store::bind_server_id`], which keeps the
//! invariant that a `(model, id)` pair maps to exactly one [`Record`].
//!
//! Store methods are synchronous except where they wait on the adapter.
//! No lock is held across an `.await`, and events are published after the
//! cache lock is released.

mod array;
mod commit;
mod resolver;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::adapter::{Adapter, AdapterError};
use crate::events::{Subscribers, Subscription};
use crate::record::{Id, PersistState, Record, RecordKey, Snapshot};
use crate::schema::{ModelSchema, ModelType, Registry};
use crate::serializer::{Normalized, ResourcePayload, Serializer};

pub use array::{ArrayChange, RecordArray};
pub use commit::CommitReport;

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("Unknown model '{model}'")]
    UnknownModel { model: String },

    #[error("Model '{model}' has no attribute '{attribute}'")]
    UnknownAttribute { model: String, attribute: String },

    #[error("Model '{model}' has no {kind} relationship '{relationship}'")]
    UnknownRelationship {
        model: String,
        relationship: String,
        kind: &'static str,
    },

    #[error("Attribute '{model}.{attribute}' expects {expected}, got {value}")]
    TypeMismatch {
        model: String,
        attribute: String,
        expected: &'static str,
        value: String,
    },

    #[error("Relationship '{model}.{relationship}' expects a '{expected}' record, got '{actual}'")]
    WrongTarget {
        model: String,
        relationship: String,
        expected: String,
        actual: String,
    },

    #[error("Record {key} is deleted")]
    RecordDeleted { key: String },
}

impl StoreError {
    /// The adapter failure behind this error, if any.
    pub fn adapter_error(&self) -> Option<&AdapterError> {
        match self {
            StoreError::Adapter(err) => Some(err),
            _ => None,
        }
    }

    /// Flatten into an adapter error so it can be stored on a record.
    pub(crate) fn into_adapter(self) -> AdapterError {
        match self {
            StoreError::Adapter(err) => err,
            other => AdapterError::Decode(other.to_string()),
        }
    }
}

/// Cache membership changes, published per record.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// The record became visible (loaded, pushed or created locally).
    Added(Record),
    /// Attributes, links or persistence state changed.
    Changed(Record),
    /// The record left the cache (deleted or unloaded).
    Removed(Record),
}

impl StoreEvent {
    pub fn record(&self) -> &Record {
        match self {
            StoreEvent::Added(r) | StoreEvent::Changed(r) | StoreEvent::Removed(r) => r,
        }
    }
}

#[derive(Default)]
struct Cache {
    records: HashMap<RecordKey, Record>,
    /// Visible records per model in insertion order.
    by_model: HashMap<ModelType, Vec<Record>>,
}

impl Cache {
    fn show(&mut self, record: &Record) {
        let list = self.by_model.entry(record.model().clone()).or_default();
        if !list.iter().any(|r| r.ptr_eq(record)) {
            list.push(record.clone());
        }
    }

    fn hide(&mut self, record: &Record) {
        if let Some(list) = self.by_model.get_mut(record.model()) {
            list.retain(|r| !r.ptr_eq(record));
        }
    }
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    registry: Arc<Registry>,
    adapter: Arc<dyn Adapter>,
    serializer: Serializer,
    cache: Mutex<Cache>,
    events: Arc<Subscribers<StoreEvent>>,
}

impl Store {
    pub fn new(registry: Arc<Registry>, adapter: Arc<dyn Adapter>) -> Self {
        let serializer = Serializer::new(registry.clone(), adapter.mapping().clone());
        tracing::debug!(
            adapter = adapter.name(),
            models = registry.len(),
            "Store created"
        );
        Self {
            inner: Arc::new(StoreInner {
                registry,
                adapter,
                serializer,
                cache: Mutex::new(Cache::default()),
                events: Subscribers::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.inner.adapter
    }

    pub fn serializer(&self) -> &Serializer {
        &self.inner.serializer
    }

    /// Subscribe to cache events for every model.
    pub fn subscribe<F>(&self, callback: F) -> Subscription<StoreEvent>
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }

    fn emit(&self, events: Vec<StoreEvent>) {
        for event in &events {
            self.inner.events.emit(event);
        }
    }

    pub(crate) fn schema(&self, model: &ModelType) -> Result<Arc<ModelSchema>, StoreError> {
        self.inner
            .registry
            .get(model)
            .cloned()
            .ok_or_else(|| StoreError::UnknownModel {
                model: model.to_string(),
            })
    }

    /// Cached record for a server id, without touching the network.
    pub fn peek(&self, model: impl Into<ModelType>, id: &str) -> Option<Record> {
        let key = RecordKey {
            model: model.into(),
            id: Id::server(id),
        };
        self.inner.cache.lock().records.get(&key).cloned()
    }

    pub(crate) fn lookup(&self, key: &RecordKey) -> Option<Record> {
        self.inner.cache.lock().records.get(key).cloned()
    }

    /// Whether this exact record instance is still cached.
    pub fn contains(&self, record: &Record) -> bool {
        self.lookup(&record.key())
            .is_some_and(|cached| cached.ptr_eq(record))
    }

    /// Return the record for `(model, id)` immediately.
    ///
    /// On a cache miss a placeholder in state `Loading` is cached and one
    /// background fetch is started; concurrent callers get the same
    /// placeholder. Await [`Record::settled`] or use [`Store::find_loaded`]
    /// to wait for the data. Must be called inside a Tokio runtime.
    pub fn find(&self, model: impl Into<ModelType>, id: impl Into<String>) -> Result<Record, StoreError> {
        let model = model.into();
        let schema = self.schema(&model)?;
        let key = RecordKey {
            model,
            id: Id::Server(id.into()),
        };

        let (record, fetch) = {
            let mut cache = self.inner.cache.lock();
            match cache.records.get(&key) {
                Some(record) => (record.clone(), false),
                None => {
                    let record = Record::placeholder(schema, key.id.clone());
                    cache.records.insert(key.clone(), record.clone());
                    (record, true)
                }
            }
        };

        if fetch {
            tracing::debug!(key = %key, "Cache miss, fetching");
            let store = self.clone();
            let placeholder = record.clone();
            tokio::spawn(async move { store.load(placeholder).await });
        } else {
            tracing::debug!(key = %key, state = ?record.state(), "Cache hit");
        }
        Ok(record)
    }

    /// [`Store::find`] and wait for the record to load.
    pub async fn find_loaded(
        &self,
        model: impl Into<ModelType>,
        id: impl Into<String>,
    ) -> Result<Record, StoreError> {
        let record = self.find(model, id)?;
        record.wait_idle().await;
        if !self.contains(&record) {
            let err = record.last_error().unwrap_or_else(|| AdapterError::NotFound {
                model: record.model().to_string(),
                id: record.id().to_string(),
            });
            return Err(err.into());
        }
        Ok(record)
    }

    async fn load(&self, placeholder: Record) {
        let model = placeholder.model().clone();
        let id = placeholder.id().to_string();

        let result = match self.inner.adapter.fetch(&model, &id).await {
            Ok(doc) => self.push(&model, doc).map_err(StoreError::into_adapter),
            Err(err) => Err(err),
        };

        let err = match result {
            Ok(_) if placeholder.state() != PersistState::Loading => return,
            Ok(_) => AdapterError::NotFound {
                model: model.to_string(),
                id: id.clone(),
            },
            Err(err) => err,
        };

        // Another load may have materialized the placeholder meanwhile; the
        // record is then live and must stay in the identity map.
        let mut cache = self.inner.cache.lock();
        if placeholder.state() != PersistState::Loading {
            drop(cache);
            tracing::debug!(model = %model, id = %id, error = %err, "Fetch failed after record loaded elsewhere");
            return;
        }
        let key = placeholder.key();
        if cache.records.get(&key).is_some_and(|r| r.ptr_eq(&placeholder)) {
            cache.records.remove(&key);
        }
        placeholder.record_error(err.clone());
        placeholder.set_state(PersistState::Error);
        drop(cache);
        tracing::warn!(model = %model, id = %id, error = %err, "Fetch failed");
    }

    /// Live array of every record of `model`, refreshed from the server in
    /// the background.
    pub fn find_all(&self, model: impl Into<ModelType>) -> Result<RecordArray, StoreError> {
        let array = self.all(model)?;
        let store = self.clone();
        let model = array.model().clone();
        tokio::spawn(async move {
            if let Err(err) = store.fetch_all(&model).await {
                tracing::warn!(model = %model, error = %err, "Fetch all failed");
            }
        });
        Ok(array)
    }

    /// Fetch every record of `model`, then return the live array.
    pub async fn find_all_loaded(&self, model: impl Into<ModelType>) -> Result<RecordArray, StoreError> {
        let array = self.all(model)?;
        self.fetch_all(array.model()).await?;
        Ok(array)
    }

    async fn fetch_all(&self, model: &ModelType) -> Result<Vec<Record>, StoreError> {
        let doc = self.inner.adapter.fetch_all(model).await?;
        self.push(model, doc)
    }

    /// Live array over cached records of `model`; no network.
    pub fn all(&self, model: impl Into<ModelType>) -> Result<RecordArray, StoreError> {
        let model = model.into();
        self.schema(&model)?;
        Ok(RecordArray::new(self.clone(), model))
    }

    /// Snapshot of visible records of `model`, insertion ordered.
    pub(crate) fn visible(&self, model: &ModelType) -> Vec<Record> {
        self.inner
            .cache
            .lock()
            .by_model
            .get(model)
            .cloned()
            .unwrap_or_default()
    }

    /// Merge a server document for `model` into the store and return the
    /// primary records.
    pub fn push(&self, model: &ModelType, doc: Value) -> Result<Vec<Record>, StoreError> {
        let normalized = self.inner.serializer.normalize(model, doc)?;
        self.absorb(normalized)
    }

    /// Materialize included resources first so primaries can link to them.
    fn absorb(&self, normalized: Normalized) -> Result<Vec<Record>, StoreError> {
        for payload in normalized.included {
            if payload.id.is_none() {
                tracing::warn!(model = %payload.model, "Skipping included resource without id");
                continue;
            }
            self.materialize(payload)?;
        }
        normalized
            .primary
            .into_iter()
            .map(|payload| self.materialize(payload))
            .collect()
    }

    /// Bind a payload to its record, merging into an existing instance when
    /// the id is already known.
    fn materialize(&self, payload: ResourcePayload) -> Result<Record, StoreError> {
        let schema = self.schema(&payload.model)?;
        let id = payload.id.clone().ok_or_else(|| {
            AdapterError::Decode(format!("'{}' payload without id", payload.model))
        })?;
        let key = RecordKey {
            model: payload.model.clone(),
            id: Id::Server(id),
        };
        let values = snapshot_from(payload);

        let (record, event) = {
            let mut cache = self.inner.cache.lock();
            match cache.records.get(&key).cloned() {
                Some(existing) => {
                    existing.merge_server(values);
                    if existing.state() == PersistState::Loading {
                        // Flip the state under the lock so a concurrent
                        // materialization sees it as loaded.
                        existing.set_state(PersistState::Loaded);
                        cache.show(&existing);
                        (existing.clone(), StoreEvent::Added(existing))
                    } else {
                        (existing.clone(), StoreEvent::Changed(existing))
                    }
                }
                None => {
                    let record = Record::loaded(schema, key.id.clone(), values);
                    cache.records.insert(key.clone(), record.clone());
                    cache.show(&record);
                    (record.clone(), StoreEvent::Added(record))
                }
            }
        };

        tracing::debug!(key = %key, "Materialized record");
        self.emit(vec![event]);
        Ok(record)
    }

    /// Rekey a freshly created record under its server id and point links
    /// at the new id.
    ///
    /// # Panics
    /// If another record already owns the id. That would break the identity
    /// map and indicates a server or programming error.
    fn bind_server_id(&self, record: &Record, id: String) {
        let old_id = record.id();
        let new_id = Id::Server(id);
        let new_key = RecordKey {
            model: record.model().clone(),
            id: new_id.clone(),
        };

        let relinked: Vec<Record> = {
            let mut cache = self.inner.cache.lock();
            if let Some(existing) = cache.records.get(&new_key) {
                if !existing.ptr_eq(record) {
                    panic!(
                        "store integrity violation: {} is already bound to another record",
                        new_key
                    );
                }
            }
            cache.records.remove(&record.key());
            record.assign_id(new_id.clone());
            cache.records.insert(new_key.clone(), record.clone());

            cache
                .by_model
                .values()
                .flatten()
                .filter(|r| r.rewrite_link(&old_id, &new_id))
                .cloned()
                .collect()
        };

        tracing::debug!(from = %old_id, key = %new_key, relinked = relinked.len(), "Assigned server id");
        self.emit(relinked.into_iter().map(StoreEvent::Changed).collect());
    }

    /// Allocate a new local record; nothing is sent until it is committed.
    ///
    /// `attributes` may also carry belongs_to foreign keys (`photo_id`).
    pub fn create_record(
        &self,
        model: impl Into<ModelType>,
        attributes: Value,
    ) -> Result<Record, StoreError> {
        let model = model.into();
        let schema = self.schema(&model)?;
        let fields = match attributes {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(StoreError::TypeMismatch {
                    model: model.to_string(),
                    attribute: "<record>".to_string(),
                    expected: "object",
                    value: other.to_string(),
                })
            }
        };

        let mut values = Snapshot::default();
        for (name, value) in fields {
            if let Some(rel) = schema.belongs_to_by_key(&name) {
                let owner = crate::serializer::value_to_id(&value).map(Id::Server);
                values.links.insert(rel.name.clone(), owner);
                continue;
            }
            let def = schema
                .attribute(&name)
                .ok_or_else(|| StoreError::UnknownAttribute {
                    model: model.to_string(),
                    attribute: name.clone(),
                })?;
            if !def.kind.accepts(&value) {
                return Err(StoreError::TypeMismatch {
                    model: model.to_string(),
                    attribute: name,
                    expected: def.kind.name(),
                    value: value.to_string(),
                });
            }
            values.attributes.insert(name, value);
        }

        let record = Record::new_local(schema, values);
        {
            let mut cache = self.inner.cache.lock();
            cache.records.insert(record.key(), record.clone());
            cache.show(&record);
        }
        tracing::debug!(key = %record.key(), "Created local record");
        self.emit(vec![StoreEvent::Added(record.clone())]);
        Ok(record)
    }

    pub fn set_attribute(
        &self,
        record: &Record,
        attribute: &str,
        value: impl Into<Value>,
    ) -> Result<(), StoreError> {
        if record.write_attribute(attribute, value.into())? {
            self.emit(vec![StoreEvent::Changed(record.clone())]);
        }
        Ok(())
    }

    /// Point a belongs_to relationship at `owner` (or clear it).
    pub fn set_belongs_to(
        &self,
        record: &Record,
        relationship: &str,
        owner: Option<&Record>,
    ) -> Result<(), StoreError> {
        let rel = record
            .schema()
            .relationship_named(relationship)
            .filter(|r| r.is_belongs_to())
            .ok_or_else(|| StoreError::UnknownRelationship {
                model: record.model().to_string(),
                relationship: relationship.to_string(),
                kind: "belongs_to",
            })?;
        if let Some(owner) = owner {
            if owner.model() != &rel.target {
                return Err(StoreError::WrongTarget {
                    model: record.model().to_string(),
                    relationship: relationship.to_string(),
                    expected: rel.target.to_string(),
                    actual: owner.model().to_string(),
                });
            }
        }
        if record.write_link(relationship, owner.map(Record::id))? {
            self.emit(vec![StoreEvent::Changed(record.clone())]);
        }
        Ok(())
    }

    /// Discard unsaved edits and a pending deletion.
    pub fn rollback(&self, record: &Record) {
        record.rollback();
        if record.state() == PersistState::Error {
            let state = if record.is_new() {
                PersistState::New
            } else {
                PersistState::Loaded
            };
            record.set_state(state);
        }
        self.emit(vec![StoreEvent::Changed(record.clone())]);
    }

    /// Mark `record` for deletion; the next commit sends the delete.
    pub fn delete_record(&self, record: &Record) {
        if record.mark_deleted() {
            tracing::debug!(key = %record.key(), "Marked for deletion");
            self.emit(vec![StoreEvent::Changed(record.clone())]);
        }
    }

    /// Drop `record` from the cache without telling the server.
    pub fn unload(&self, record: &Record) {
        if self.evict(record) {
            self.emit(vec![StoreEvent::Removed(record.clone())]);
        }
    }

    fn evict(&self, record: &Record) -> bool {
        let mut cache = self.inner.cache.lock();
        let key = record.key();
        if !cache.records.get(&key).is_some_and(|r| r.ptr_eq(record)) {
            return false;
        }
        cache.records.remove(&key);
        cache.hide(record);
        true
    }
}

fn snapshot_from(payload: ResourcePayload) -> Snapshot {
    Snapshot {
        attributes: payload.attributes,
        links: payload
            .links
            .into_iter()
            .map(|(name, owner)| (name, owner.map(Id::Server)))
            .collect::<BTreeMap<_, _>>(),
    }
}
