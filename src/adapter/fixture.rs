//! In-memory adapter backed by fixture rows.
//!
//! Behaves like a well-formed resource server: assigns numeric ids on
//! create, answers 404-equivalents with [`AdapterError::NotFound`] and logs
//! every request so callers can assert on traffic.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::adapter::mapping::ResourceMapping;
use crate::adapter::{Adapter, AdapterError};
use crate::schema::ModelType;
use crate::serializer::value_to_id;

/// A request seen by the fixture adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureRequest {
    pub method: &'static str,
    pub path: String,
    pub body: Option<Value>,
}

pub struct FixtureAdapter {
    mapping: ResourceMapping,
    tables: Mutex<HashMap<ModelType, Vec<Map<String, Value>>>>,
    next_id: AtomicU64,
    log: Mutex<Vec<FixtureRequest>>,
    failures: Mutex<VecDeque<AdapterError>>,
    latency: Option<Duration>,
    bulk: bool,
}

impl Default for FixtureAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureAdapter {
    pub fn new() -> Self {
        Self {
            mapping: ResourceMapping::new(),
            tables: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            log: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            latency: None,
            bulk: false,
        }
    }

    pub fn with_mapping(mut self, mapping: ResourceMapping) -> Self {
        self.mapping = mapping;
        self
    }

    /// Delay every request, which keeps records in flight long enough to
    /// observe de-duplication and commit ordering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_bulk_commit(mut self, enabled: bool) -> Self {
        self.bulk = enabled;
        self
    }

    /// Seed a row. Objects without an `id` get one assigned.
    pub fn insert(&self, model: impl Into<ModelType>, row: Value) {
        let Value::Object(mut row) = row else {
            return;
        };
        match row.get("id").and_then(value_to_id) {
            Some(id) => {
                if let Ok(n) = id.parse::<u64>() {
                    self.next_id.fetch_max(n + 1, Ordering::SeqCst);
                }
            }
            None => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                row.insert("id".to_string(), Value::from(id));
            }
        }
        self.tables.lock().entry(model.into()).or_default().push(row);
    }

    /// Make the next request fail with `err`.
    pub fn fail_next(&self, err: AdapterError) {
        self.failures.lock().push_back(err);
    }

    pub fn requests(&self) -> Vec<FixtureRequest> {
        self.log.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.log.lock().len()
    }

    pub fn rows(&self, model: impl Into<ModelType>) -> Vec<Value> {
        self.tables
            .lock()
            .get(&model.into())
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    async fn begin(
        &self,
        method: &'static str,
        model: &ModelType,
        id: Option<&str>,
        body: Option<Value>,
    ) -> Result<(), AdapterError> {
        let mut path = format!("/{}", self.mapping.plural(model));
        if let Some(id) = id {
            path.push('/');
            path.push_str(id);
        }
        tracing::debug!(adapter = "fixture", method, %path, "Handling request");
        self.log.lock().push(FixtureRequest { method, path, body });

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn find_row(&self, model: &ModelType, id: &str) -> Result<Map<String, Value>, AdapterError> {
        self.tables
            .lock()
            .get(model)
            .and_then(|rows| rows.iter().find(|row| row_id(row).as_deref() == Some(id)))
            .cloned()
            .ok_or_else(|| not_found(model, id))
    }

    fn create_row(&self, model: &ModelType, body: Value) -> Result<Value, AdapterError> {
        let mut row = match body {
            Value::Object(map) => map,
            other => {
                return Err(AdapterError::ValidationFailed {
                    status: 422,
                    errors: Default::default(),
                    body: format!("expected object, got {}", other),
                })
            }
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        row.insert("id".to_string(), Value::from(id));
        self.tables
            .lock()
            .entry(model.clone())
            .or_default()
            .push(row.clone());
        Ok(Value::Object(row))
    }

    fn update_row(&self, model: &ModelType, id: &str, body: Value) -> Result<Value, AdapterError> {
        let mut tables = self.tables.lock();
        let row = tables
            .get_mut(model)
            .and_then(|rows| rows.iter_mut().find(|row| row_id(row).as_deref() == Some(id)))
            .ok_or_else(|| not_found(model, id))?;
        if let Value::Object(fields) = body {
            for (name, value) in fields {
                if name != "id" {
                    row.insert(name, value);
                }
            }
        }
        Ok(Value::Object(row.clone()))
    }

    fn delete_row(&self, model: &ModelType, id: &str) -> Result<(), AdapterError> {
        let mut tables = self.tables.lock();
        let rows = tables.get_mut(model).ok_or_else(|| not_found(model, id))?;
        let before = rows.len();
        rows.retain(|row| row_id(row).as_deref() != Some(id));
        if rows.len() == before {
            return Err(not_found(model, id));
        }
        Ok(())
    }
}

fn row_id(row: &Map<String, Value>) -> Option<String> {
    row.get("id").and_then(value_to_id)
}

fn not_found(model: &ModelType, id: &str) -> AdapterError {
    AdapterError::NotFound {
        model: model.to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl Adapter for FixtureAdapter {
    fn name(&self) -> &'static str {
        "fixture"
    }

    fn mapping(&self) -> &ResourceMapping {
        &self.mapping
    }

    fn bulk_commit(&self) -> bool {
        self.bulk
    }

    async fn fetch(&self, model: &ModelType, id: &str) -> Result<Value, AdapterError> {
        self.begin("GET", model, Some(id), None).await?;
        self.find_row(model, id).map(Value::Object)
    }

    async fn fetch_all(&self, model: &ModelType) -> Result<Value, AdapterError> {
        self.begin("GET", model, None, None).await?;
        Ok(Value::Array(self.rows(model)))
    }

    async fn create(&self, model: &ModelType, body: Value) -> Result<Value, AdapterError> {
        self.begin("POST", model, None, Some(body.clone())).await?;
        self.create_row(model, body)
    }

    async fn update(&self, model: &ModelType, id: &str, body: Value) -> Result<Value, AdapterError> {
        self.begin("PUT", model, Some(id), Some(body.clone())).await?;
        self.update_row(model, id, body)
    }

    async fn delete(&self, model: &ModelType, id: &str) -> Result<(), AdapterError> {
        self.begin("DELETE", model, Some(id), None).await?;
        self.delete_row(model, id)
    }

    async fn create_many(
        &self,
        model: &ModelType,
        bodies: Vec<Value>,
    ) -> Result<Vec<Value>, AdapterError> {
        if !self.bulk {
            let mut out = Vec::with_capacity(bodies.len());
            for body in bodies {
                out.push(self.create(model, body).await?);
            }
            return Ok(out);
        }
        self.begin("POST", model, None, Some(Value::Array(bodies.clone())))
            .await?;
        bodies
            .into_iter()
            .map(|body| self.create_row(model, body))
            .collect()
    }

    async fn update_many(
        &self,
        model: &ModelType,
        items: Vec<(String, Value)>,
    ) -> Result<Vec<Value>, AdapterError> {
        if !self.bulk {
            let mut out = Vec::with_capacity(items.len());
            for (id, body) in items {
                out.push(self.update(model, &id, body).await?);
            }
            return Ok(out);
        }
        let batch = items.iter().map(|(_, body)| body.clone()).collect();
        self.begin("PUT", model, None, Some(Value::Array(batch))).await?;
        items
            .into_iter()
            .map(|(id, body)| self.update_row(model, &id, body))
            .collect()
    }

    async fn delete_many(&self, model: &ModelType, ids: Vec<String>) -> Result<(), AdapterError> {
        if !self.bulk {
            for id in ids {
                self.delete(model, &id).await?;
            }
            return Ok(());
        }
        let batch = ids.iter().map(|id| Value::String(id.clone())).collect();
        self.begin("DELETE", model, None, Some(Value::Array(batch)))
            .await?;
        for id in &ids {
            self.delete_row(model, id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_assigns_ids_after_seeded_rows() {
        let adapter = FixtureAdapter::new();
        adapter.insert("photo", json!({"id": 4, "title": "seed"}));

        let created = adapter
            .create(&ModelType::new("photo"), json!({"title": "new"}))
            .await
            .unwrap();
        assert_eq!(created["id"], 5);
        assert_eq!(adapter.rows("photo").len(), 2);
    }

    #[tokio::test]
    async fn test_missing_row_is_not_found() {
        let adapter = FixtureAdapter::new();
        let err = adapter
            .fetch(&ModelType::new("photo"), "1")
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::NotFound { .. }));
        assert_eq!(adapter.requests()[0].path, "/photos/1");
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed_once() {
        let adapter = FixtureAdapter::new();
        adapter.insert("photo", json!({"id": 1}));
        adapter.fail_next(AdapterError::NetworkFailure("reset".to_string()));

        let photo = ModelType::new("photo");
        assert!(adapter.fetch(&photo, "1").await.is_err());
        assert!(adapter.fetch(&photo, "1").await.is_ok());
    }

    #[tokio::test]
    async fn test_bulk_create_is_one_request() {
        let adapter = FixtureAdapter::new().with_bulk_commit(true);
        let created = adapter
            .create_many(
                &ModelType::new("photo"),
                vec![json!({"title": "a"}), json!({"title": "b"})],
            )
            .await
            .unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(adapter.request_count(), 1);
    }

    #[tokio::test]
    async fn test_request_paths_follow_mapping() {
        let adapter = FixtureAdapter::new()
            .with_mapping(ResourceMapping::new().with_override("person", "person", "people"));
        adapter.insert("person", json!({"id": 1, "name": "Ann"}));

        adapter.fetch(&ModelType::new("person"), "1").await.unwrap();
        adapter.fetch_all(&ModelType::new("blogPost")).await.unwrap();

        let paths: Vec<String> = adapter.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/people/1", "/blog_posts"]);
    }
}
