//! Shared test utilities and mock infrastructure.

#![allow(dead_code, unused_imports)]

pub mod mock_backend;

use async_trait::async_trait;
use modelsync::adapter::{Adapter, AdapterError, FixtureAdapter, ResourceMapping, RestAdapter};
use modelsync::schema::{AttrType, ModelSchema, ModelType, Registry};
use modelsync::store::Store;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

pub use mock_backend::{CapturedRequest, MockBackend, MockResponse};

/// Photo blog schema: photos with comments.
pub fn photoblog_registry() -> Arc<Registry> {
    let registry = Registry::builder()
        .model(
            ModelSchema::build("photo")
                .attr("title", AttrType::String)
                .attr("url", AttrType::String)
                .has_many("comments", "comment"),
        )
        .model(
            ModelSchema::build("comment")
                .attr("text", AttrType::String)
                .belongs_to("photo", "photo"),
        )
        .build()
        .expect("photoblog schema is valid");
    Arc::new(registry)
}

/// Store over an in-memory fixture adapter.
pub fn fixture_store(adapter: FixtureAdapter) -> (Store, Arc<FixtureAdapter>) {
    let adapter = Arc::new(adapter);
    let store = Store::new(photoblog_registry(), adapter.clone() as Arc<dyn Adapter>);
    (store, adapter)
}

/// Fixture adapter whose single-record fetches wait until released, so a
/// test can interleave other loads with an in-flight `find`.
pub struct GatedAdapter {
    inner: FixtureAdapter,
    gate: Semaphore,
}

impl GatedAdapter {
    pub fn new(inner: FixtureAdapter) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
        }
    }

    pub fn fixture(&self) -> &FixtureAdapter {
        &self.inner
    }

    /// Let one waiting (or future) fetch through.
    pub fn release_fetch(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl Adapter for GatedAdapter {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn mapping(&self) -> &ResourceMapping {
        self.inner.mapping()
    }

    async fn fetch(&self, model: &ModelType, id: &str) -> Result<Value, AdapterError> {
        self.gate
            .acquire()
            .await
            .map_err(|e| AdapterError::NetworkFailure(e.to_string()))?
            .forget();
        self.inner.fetch(model, id).await
    }

    async fn fetch_all(&self, model: &ModelType) -> Result<Value, AdapterError> {
        self.inner.fetch_all(model).await
    }

    async fn create(&self, model: &ModelType, body: Value) -> Result<Value, AdapterError> {
        self.inner.create(model, body).await
    }

    async fn update(&self, model: &ModelType, id: &str, body: Value) -> Result<Value, AdapterError> {
        self.inner.update(model, id, body).await
    }

    async fn delete(&self, model: &ModelType, id: &str) -> Result<(), AdapterError> {
        self.inner.delete(model, id).await
    }
}

/// Store over a [`GatedAdapter`].
pub fn gated_store(adapter: FixtureAdapter) -> (Store, Arc<GatedAdapter>) {
    let adapter = Arc::new(GatedAdapter::new(adapter));
    let store = Store::new(photoblog_registry(), adapter.clone() as Arc<dyn Adapter>);
    (store, adapter)
}

/// Poll until `done` holds, giving spawned tasks time to run.
pub async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Store talking to `backend` over HTTP.
pub fn rest_store(backend: &MockBackend) -> Store {
    let adapter = RestAdapter::builder(backend.base_url())
        .timeout(Duration::from_secs(5))
        .build()
        .expect("Failed to build adapter");
    Store::new(photoblog_registry(), Arc::new(adapter))
}

/// Write `content` to a config file in a fresh temp dir.
pub fn temp_config(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, content).expect("Failed to write config");
    (temp_dir, config_path)
}

pub const PHOTOBLOG_CONFIG: &str = r#"
[adapter]
base_url = "http://127.0.0.1:3000"
namespace = "api"
timeout_seconds = 5

[logging]
filter = "debug"

[[resources]]
model = "person"
plural = "people"

[[models]]
name = "photo"
attributes = [
    { name = "title", type = "string" },
    { name = "url", type = "string" },
]
relationships = [
    { name = "comments", kind = "has_many", target = "comment" },
]

[[models]]
name = "comment"
attributes = [{ name = "text", type = "string" }]
relationships = [
    { name = "photo", kind = "belongs_to", target = "photo" },
]

[[models]]
name = "person"
attributes = [{ name = "name", type = "string" }]
"#;
