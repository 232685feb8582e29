//! Writing records back through the adapter.
//!
//! Each record carries an async commit lock, so two `commit` calls on the
//! same record never overlap: the second waits for the first and then
//! re-plans against whatever state the first left behind.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tokio::sync::MutexGuard;

use super::{Store, StoreError, StoreEvent};
use crate::adapter::AdapterError;
use crate::record::{PersistState, Record, Snapshot};
use crate::schema::{ModelType, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Operation {
    Create,
    Update,
    Delete,
    /// Deleted before it was ever saved; dropped without a request.
    Discard,
    Skip,
}

fn plan(record: &Record) -> Operation {
    if record.state() == PersistState::Deleted {
        return Operation::Skip;
    }
    let data = record.data();
    match (data.marked_deleted, data.persisted) {
        (true, false) => Operation::Discard,
        (true, true) => Operation::Delete,
        (false, false) => Operation::Create,
        (false, true) if !data.changed.is_empty() => Operation::Update,
        _ => Operation::Skip,
    }
}

/// Outcome of [`Store::commit_all`].
#[derive(Debug, Default)]
pub struct CommitReport {
    pub committed: Vec<Record>,
    pub failed: Vec<(Record, AdapterError)>,
}

impl CommitReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, record: &Record, result: Result<(), AdapterError>) {
        match result {
            Ok(()) => self.committed.push(record.clone()),
            Err(err) => self.failed.push((record.clone(), err)),
        }
    }
}

impl Store {
    /// Persist pending changes of one record.
    ///
    /// New records are created, dirty ones updated and records marked for
    /// deletion deleted. A clean record is left alone. On failure the record
    /// moves to [`PersistState::Error`] with the rejected edits reverted.
    pub async fn commit(&self, record: &Record) -> Result<(), StoreError> {
        let _guard = record.commit_lock().lock().await;
        self.commit_locked(record).await.map_err(StoreError::from)
    }

    /// Mark for deletion and commit right away.
    pub async fn destroy_record(&self, record: &Record) -> Result<(), StoreError> {
        self.delete_record(record);
        self.commit(record).await
    }

    async fn commit_locked(&self, record: &Record) -> Result<(), AdapterError> {
        let op = plan(record);
        let model = record.model().clone();
        let adapter = self.inner.adapter.clone();

        match op {
            Operation::Skip => {
                tracing::debug!(key = %record.key(), "Nothing to commit");
                Ok(())
            }
            Operation::Discard => {
                self.finish_delete(record);
                Ok(())
            }
            Operation::Create => {
                let (sent, body) = self.start(record);
                match adapter.create(&model, body).await {
                    Ok(doc) => self.finish_create(record, &sent, doc),
                    Err(err) => Err(self.fail(record, &sent, err)),
                }
            }
            Operation::Update => {
                let Some(id) = record.server_id() else {
                    return Err(missing_server_id(record));
                };
                let (sent, body) = self.start(record);
                match adapter.update(&model, &id, body).await {
                    Ok(doc) => self.finish_update(record, &sent, doc),
                    Err(err) => Err(self.fail(record, &sent, err)),
                }
            }
            Operation::Delete => {
                let Some(id) = record.server_id() else {
                    return Err(missing_server_id(record));
                };
                self.start(record);
                match adapter.delete(&model, &id).await {
                    Ok(()) => {
                        self.finish_delete(record);
                        Ok(())
                    }
                    Err(err) => Err(self.fail(record, &Snapshot::default(), err)),
                }
            }
        }
    }

    /// Persist every pending change in the store as one commit cycle.
    ///
    /// Creates run first, owners before the records that belong to them, so
    /// children are written with their owner's server id. Deletes run last,
    /// children before owners. With a bulk-commit adapter each model's
    /// creates, updates and deletes go out as one request each.
    pub async fn commit_all(&self) -> CommitReport {
        let order = owner_first(self.registry());
        let mut groups: HashMap<(ModelType, Operation), Vec<Record>> = HashMap::new();
        let mut discards = Vec::new();
        for model in &order {
            for record in self.visible(model) {
                match plan(&record) {
                    Operation::Skip => {}
                    Operation::Discard => discards.push(record),
                    op => groups.entry((model.clone(), op)).or_default().push(record),
                }
            }
        }

        let mut passes: Vec<(ModelType, Operation)> = Vec::new();
        passes.extend(order.iter().map(|m| (m.clone(), Operation::Create)));
        passes.extend(order.iter().map(|m| (m.clone(), Operation::Update)));
        passes.extend(order.iter().rev().map(|m| (m.clone(), Operation::Delete)));

        let bulk = self.inner.adapter.bulk_commit();
        let mut report = CommitReport::default();
        tracing::info!(
            groups = groups.len(),
            discards = discards.len(),
            bulk,
            "Commit cycle started"
        );

        for record in &discards {
            let result = self.commit(record).await.map_err(StoreError::into_adapter);
            report.record(record, result);
        }

        for pass in passes {
            let Some(records) = groups.remove(&pass) else {
                continue;
            };
            let (model, op) = pass;
            if !bulk || records.len() == 1 {
                for record in &records {
                    let result = self.commit(record).await.map_err(StoreError::into_adapter);
                    report.record(record, result);
                }
                continue;
            }
            self.commit_batch(&model, op, &records, &mut report).await;
        }

        tracing::info!(
            committed = report.committed.len(),
            failed = report.failed.len(),
            "Commit cycle finished"
        );
        report
    }

    async fn commit_batch(
        &self,
        model: &ModelType,
        op: Operation,
        records: &[Record],
        report: &mut CommitReport,
    ) {
        let mut guards: Vec<MutexGuard<'_, ()>> = Vec::with_capacity(records.len());
        for record in records {
            guards.push(record.commit_lock().lock().await);
        }
        // Another commit may have finished while we waited for the locks.
        let batch: Vec<&Record> = records.iter().filter(|r| plan(r) == op).collect();
        if batch.is_empty() {
            return;
        }
        let adapter = self.inner.adapter.clone();
        tracing::info!(model = %model, op = ?op, count = batch.len(), "Sending batch");

        match op {
            Operation::Create => {
                let started: Vec<(Snapshot, Value)> = batch.iter().map(|r| self.start(r)).collect();
                let bodies = started.iter().map(|(_, body)| body.clone()).collect();
                match adapter.create_many(model, bodies).await {
                    Ok(docs) => {
                        for ((record, (sent, _)), doc) in batch.iter().zip(&started).zip(docs) {
                            let result = self.finish_create(record, sent, doc);
                            report.record(record, result);
                        }
                    }
                    Err(err) => {
                        for (record, (sent, _)) in batch.iter().zip(&started) {
                            let err = self.fail(record, sent, err.clone());
                            report.record(record, Err(err));
                        }
                    }
                }
            }
            Operation::Update => {
                let batch = with_server_ids(batch, report);
                if batch.is_empty() {
                    return;
                }
                let started: Vec<(Snapshot, Value)> =
                    batch.iter().map(|(r, _)| self.start(r)).collect();
                let items = batch
                    .iter()
                    .zip(&started)
                    .map(|((_, id), (_, body))| (id.clone(), body.clone()))
                    .collect();
                match adapter.update_many(model, items).await {
                    Ok(docs) => {
                        for (((record, _), (sent, _)), doc) in batch.iter().zip(&started).zip(docs) {
                            let result = self.finish_update(record, sent, doc);
                            report.record(record, result);
                        }
                    }
                    Err(err) => {
                        for ((record, _), (sent, _)) in batch.iter().zip(&started) {
                            let err = self.fail(record, sent, err.clone());
                            report.record(record, Err(err));
                        }
                    }
                }
            }
            Operation::Delete => {
                let batch = with_server_ids(batch, report);
                if batch.is_empty() {
                    return;
                }
                for (record, _) in &batch {
                    self.start(record);
                }
                let ids = batch.iter().map(|(_, id)| id.clone()).collect();
                match adapter.delete_many(model, ids).await {
                    Ok(()) => {
                        for (record, _) in &batch {
                            self.finish_delete(record);
                            report.record(record, Ok(()));
                        }
                    }
                    Err(err) => {
                        for (record, _) in &batch {
                            let err = self.fail(record, &Snapshot::default(), err.clone());
                            report.record(record, Err(err));
                        }
                    }
                }
            }
            Operation::Discard | Operation::Skip => {}
        }
        drop(guards);
    }

    /// Capture what is about to be written and move to `Saving`.
    fn start(&self, record: &Record) -> (Snapshot, Value) {
        let sent = record.begin_commit();
        let body = self.inner.serializer.serialize(record);
        record.set_state(PersistState::Saving);
        self.emit(vec![StoreEvent::Changed(record.clone())]);
        (sent, body)
    }

    fn finish_create(&self, record: &Record, sent: &Snapshot, doc: Value) -> Result<(), AdapterError> {
        let model = record.model().clone();
        let normalized = match self.inner.serializer.normalize(&model, doc) {
            Ok(normalized) => normalized,
            Err(err) => return Err(self.fail(record, sent, err)),
        };
        let Some(id) = normalized.primary.first().and_then(|p| p.id.clone()) else {
            let err = AdapterError::Decode(format!("create response for '{}' has no id", model));
            return Err(self.fail(record, sent, err));
        };

        self.bind_server_id(record, id);
        record.commit_succeeded(sent);
        if let Err(err) = self.absorb(normalized) {
            tracing::warn!(key = %record.key(), error = %err, "Could not merge create response");
        }
        record.set_state(PersistState::Saved);
        tracing::info!(key = %record.key(), "Record created");
        self.emit(vec![StoreEvent::Changed(record.clone())]);
        Ok(())
    }

    fn finish_update(&self, record: &Record, sent: &Snapshot, doc: Value) -> Result<(), AdapterError> {
        record.commit_succeeded(sent);
        let merged = self
            .inner
            .serializer
            .normalize(record.model(), doc)
            .map_err(StoreError::from)
            .and_then(|mut normalized| {
                // Responses without an id describe the record that was sent.
                for payload in normalized.primary.iter_mut() {
                    if payload.id.is_none() {
                        payload.id = record.server_id();
                    }
                }
                self.absorb(normalized)
            });
        if let Err(err) = merged {
            tracing::warn!(key = %record.key(), error = %err, "Could not merge update response");
        }
        record.set_state(PersistState::Saved);
        tracing::info!(key = %record.key(), "Record updated");
        self.emit(vec![StoreEvent::Changed(record.clone())]);
        Ok(())
    }

    fn finish_delete(&self, record: &Record) {
        let evicted = self.evict(record);
        record.set_state(PersistState::Deleted);
        tracing::info!(key = %record.key(), "Record deleted");
        if evicted {
            self.emit(vec![StoreEvent::Removed(record.clone())]);
        }
    }

    fn fail(&self, record: &Record, sent: &Snapshot, err: AdapterError) -> AdapterError {
        tracing::warn!(key = %record.key(), error = %err, "Commit failed");
        record.commit_failed(sent, err.clone());
        record.set_state(PersistState::Error);
        self.emit(vec![StoreEvent::Changed(record.clone())]);
        err
    }
}

fn missing_server_id(record: &Record) -> AdapterError {
    AdapterError::Decode(format!("{} has no server id", record.key()))
}

/// Pair each record with its server id. Records without one are reported
/// as failed and left out of the batch.
fn with_server_ids<'a>(batch: Vec<&'a Record>, report: &mut CommitReport) -> Vec<(&'a Record, String)> {
    let mut out = Vec::with_capacity(batch.len());
    for record in batch {
        match record.server_id() {
            Some(id) => out.push((record, id)),
            None => report.record(record, Err(missing_server_id(record))),
        }
    }
    out
}

/// Models ordered so that every belongs_to target precedes its owner.
/// Cycles are broken at the first model reached twice.
fn owner_first(registry: &Registry) -> Vec<ModelType> {
    fn visit(
        registry: &Registry,
        model: &ModelType,
        seen: &mut HashSet<ModelType>,
        out: &mut Vec<ModelType>,
    ) {
        if !seen.insert(model.clone()) {
            return;
        }
        if let Some(schema) = registry.get(model) {
            for rel in schema.belongs_to_relationships() {
                visit(registry, &rel.target, seen, out);
            }
        }
        out.push(model.clone());
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for model in registry.models() {
        visit(registry, model, &mut seen, &mut out);
    }
    out
}
