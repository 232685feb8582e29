//! Live record collections.
//!
//! A [`RecordArray`] stores no members of its own. Every read recomputes
//! the membership from the store's per-model index, so a `has_many` view and
//! the `belongs_to` links it is derived from can never disagree.

use std::fmt;

use parking_lot::Mutex;

use super::{Store, StoreEvent};
use crate::events::Subscription;
use crate::record::Record;
use crate::schema::ModelType;

/// Membership change reported to array subscribers.
///
/// Removals carry the index the record had before the change; insertions
/// and changes carry the index after it. Applying the changes in delivery
/// order to a copy of the previous contents yields the current contents.
#[derive(Debug, Clone)]
pub enum ArrayChange {
    Inserted { index: usize, record: Record },
    Removed { index: usize, record: Record },
    Changed { index: usize, record: Record },
}

impl ArrayChange {
    pub fn record(&self) -> &Record {
        match self {
            ArrayChange::Inserted { record, .. }
            | ArrayChange::Removed { record, .. }
            | ArrayChange::Changed { record, .. } => record,
        }
    }
}

#[derive(Clone)]
struct OwnerFilter {
    relationship: String,
    owner: Record,
}

#[derive(Clone)]
pub struct RecordArray {
    store: Store,
    model: ModelType,
    filter: Option<OwnerFilter>,
}

impl RecordArray {
    pub(crate) fn new(store: Store, model: ModelType) -> Self {
        Self {
            store,
            model,
            filter: None,
        }
    }

    /// Records of `model` whose `relationship` link points at `owner`.
    pub(crate) fn owned_by(
        store: Store,
        model: ModelType,
        relationship: impl Into<String>,
        owner: Record,
    ) -> Self {
        Self {
            store,
            model,
            filter: Some(OwnerFilter {
                relationship: relationship.into(),
                owner,
            }),
        }
    }

    pub fn model(&self) -> &ModelType {
        &self.model
    }

    /// The owner this array is filtered by, for `has_many` views.
    pub fn owner(&self) -> Option<&Record> {
        self.filter.as_ref().map(|f| &f.owner)
    }

    fn matches(&self, record: &Record) -> bool {
        if record.is_deleted() {
            return false;
        }
        match &self.filter {
            None => true,
            Some(filter) => {
                record.belongs_to_id(&filter.relationship) == Some(filter.owner.id())
            }
        }
    }

    /// Current members in insertion order.
    pub fn records(&self) -> Vec<Record> {
        self.store
            .visible(&self.model)
            .into_iter()
            .filter(|r| self.matches(r))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Record> {
        self.records().into_iter().nth(index)
    }

    pub fn first(&self) -> Option<Record> {
        self.get(0)
    }

    pub fn contains(&self, record: &Record) -> bool {
        self.records().iter().any(|r| r.ptr_eq(record))
    }

    /// Observe membership changes. Dropping the returned guard stops
    /// delivery.
    pub fn subscribe<F>(&self, callback: F) -> Subscription<StoreEvent>
    where
        F: Fn(&ArrayChange) + Send + Sync + 'static,
    {
        let array = self.clone();
        let members = Mutex::new(self.records());
        self.store.subscribe(move |event| {
            if event.record().model() != &array.model {
                return;
            }
            let current = array.records();
            let changes = {
                let mut previous = members.lock();
                let changes = diff(&previous, &current, event);
                *previous = current;
                changes
            };
            for change in &changes {
                callback(change);
            }
        })
    }
}

fn position(list: &[Record], record: &Record) -> Option<usize> {
    list.iter().position(|r| r.ptr_eq(record))
}

fn diff(previous: &[Record], current: &[Record], event: &StoreEvent) -> Vec<ArrayChange> {
    let mut changes = Vec::new();
    for (index, record) in previous.iter().enumerate().rev() {
        if position(current, record).is_none() {
            changes.push(ArrayChange::Removed {
                index,
                record: record.clone(),
            });
        }
    }
    for (index, record) in current.iter().enumerate() {
        if position(previous, record).is_none() {
            changes.push(ArrayChange::Inserted {
                index,
                record: record.clone(),
            });
        }
    }
    if let StoreEvent::Changed(record) = event {
        if let (Some(_), Some(index)) = (position(previous, record), position(current, record)) {
            changes.push(ArrayChange::Changed {
                index,
                record: record.clone(),
            });
        }
    }
    changes
}

impl fmt::Debug for RecordArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordArray")
            .field("model", &self.model)
            .field("owner", &self.owner().map(Record::key))
            .finish()
    }
}
