use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::events::{Subscribers, Subscription};
use crate::record::Record;
use crate::store::{ArrayChange, RecordArray, Store, StoreEvent};

/// Change published by an [`ArrayController`].
#[derive(Debug, Clone)]
pub enum ContentEvent {
    /// The content reference itself was replaced.
    Reset,
    Item(ArrayChange),
}

/// Exposes a [`RecordArray`] with stable insertion-order enumeration.
#[derive(Clone)]
pub struct ArrayController {
    inner: Arc<ArrayInner>,
}

struct ArrayInner {
    content: RwLock<Option<RecordArray>>,
    binding: Mutex<Option<Subscription<StoreEvent>>>,
    events: Arc<Subscribers<ContentEvent>>,
}

impl Default for ArrayController {
    fn default() -> Self {
        Self::new()
    }
}

impl ArrayController {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArrayInner {
                content: RwLock::new(None),
                binding: Mutex::new(None),
                events: Subscribers::new(),
            }),
        }
    }

    pub fn with_content(content: RecordArray) -> Self {
        let controller = Self::new();
        controller.set_content(Some(content));
        controller
    }

    /// Replace the content. Subscribers get [`ContentEvent::Reset`] and then
    /// item events from the new content only.
    pub fn set_content(&self, content: Option<RecordArray>) {
        let events = self.inner.events.clone();
        let binding = content.as_ref().map(|array| {
            array.subscribe(move |change| events.emit(&ContentEvent::Item(change.clone())))
        });
        *self.inner.content.write() = content;
        *self.inner.binding.lock() = binding;
        self.inner.events.emit(&ContentEvent::Reset);
    }

    pub fn content(&self) -> Option<RecordArray> {
        self.inner.content.read().clone()
    }

    pub fn records(&self) -> Vec<Record> {
        self.content().map(|c| c.records()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription<ContentEvent>
    where
        F: Fn(&ContentEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }
}

#[derive(Debug, Clone)]
pub enum ObjectEvent {
    Reset,
    Changed,
    Removed,
}

/// Exposes a single record.
#[derive(Clone)]
pub struct ObjectController {
    inner: Arc<ObjectInner>,
}

struct ObjectInner {
    store: Store,
    content: RwLock<Option<Record>>,
    binding: Mutex<Option<Subscription<StoreEvent>>>,
    events: Arc<Subscribers<ObjectEvent>>,
}

impl ObjectController {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                store,
                content: RwLock::new(None),
                binding: Mutex::new(None),
                events: Subscribers::new(),
            }),
        }
    }

    pub fn set_content(&self, content: Option<Record>) {
        let binding = content.clone().map(|record| {
            let events = self.inner.events.clone();
            self.inner.store.subscribe(move |event| match event {
                StoreEvent::Changed(r) | StoreEvent::Added(r) if r.ptr_eq(&record) => {
                    events.emit(&ObjectEvent::Changed)
                }
                StoreEvent::Removed(r) if r.ptr_eq(&record) => events.emit(&ObjectEvent::Removed),
                _ => {}
            })
        });
        *self.inner.content.write() = content;
        *self.inner.binding.lock() = binding;
        self.inner.events.emit(&ObjectEvent::Reset);
    }

    pub fn content(&self) -> Option<Record> {
        self.inner.content.read().clone()
    }

    pub fn get(&self, attribute: &str) -> Option<Value> {
        self.content().and_then(|r| r.get(attribute))
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription<ObjectEvent>
    where
        F: Fn(&ObjectEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }
}
