use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::adapter::mapping::ResourceMapping;
use crate::adapter::{parse_field_errors, Adapter, AdapterError};
use crate::config::AdapterConfig;
use crate::schema::ModelType;
use crate::serializer::id_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Read,
    Write,
    Delete,
}

/// Adapter speaking the conventional resource API:
///
/// ```text
/// GET    /{plural}        fetch_all
/// GET    /{plural}/{id}   fetch
/// POST   /{plural}        create   (array body when bulk)
/// PUT    /{plural}/{id}   update   (PUT /{plural} with array body when bulk)
/// DELETE /{plural}/{id}   delete   (DELETE /{plural} with id array when bulk)
/// ```
pub struct RestAdapter {
    client: Client,
    base_url: Url,
    namespace: Option<String>,
    mapping: ResourceMapping,
    bulk_commit: bool,
    root_envelope: bool,
    timeout: Duration,
}

pub struct RestAdapterBuilder {
    base_url: String,
    namespace: Option<String>,
    mapping: ResourceMapping,
    bulk_commit: bool,
    root_envelope: bool,
    timeout: Duration,
    connect_timeout: Duration,
}

impl RestAdapterBuilder {
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn mapping(mut self, mapping: ResourceMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn bulk_commit(mut self, enabled: bool) -> Self {
        self.bulk_commit = enabled;
        self
    }

    pub fn root_envelope(mut self, enabled: bool) -> Self {
        self.root_envelope = enabled;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<RestAdapter, AdapterError> {
        let client = Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| AdapterError::NetworkFailure(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = Url::parse(&self.base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                AdapterError::NetworkFailure(format!("Invalid base URL '{}'", self.base_url))
            })?;

        let namespace = self
            .namespace
            .map(|ns| ns.trim_matches('/').to_string())
            .filter(|ns| !ns.is_empty());

        Ok(RestAdapter {
            client,
            base_url,
            namespace,
            mapping: self.mapping,
            bulk_commit: self.bulk_commit,
            root_envelope: self.root_envelope,
            timeout: self.timeout,
        })
    }
}

impl RestAdapter {
    pub fn builder(base_url: impl Into<String>) -> RestAdapterBuilder {
        RestAdapterBuilder {
            base_url: base_url.into(),
            namespace: None,
            mapping: ResourceMapping::new(),
            bulk_commit: false,
            root_envelope: false,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(
        config: &AdapterConfig,
        mapping: ResourceMapping,
    ) -> Result<Self, AdapterError> {
        let mut builder = Self::builder(config.base_url.as_str())
            .mapping(mapping)
            .bulk_commit(config.bulk_commit)
            .root_envelope(config.root_envelope)
            .timeout(Duration::from_secs(config.timeout_seconds as u64))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds as u64));
        if let Some(namespace) = &config.namespace {
            builder = builder.namespace(namespace.as_str());
        }
        builder.build()
    }

    pub fn collection_url(&self, model: &ModelType) -> Url {
        self.resource_url(model, None)
    }

    /// The id is pushed as one percent-encoded path segment.
    pub fn member_url(&self, model: &ModelType, id: &str) -> Url {
        self.resource_url(model, Some(id))
    }

    fn resource_url(&self, model: &ModelType, id: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        // build() rejects cannot-be-a-base URLs, so segments are always available.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            if let Some(ns) = &self.namespace {
                segments.extend(ns.split('/').filter(|s| !s.is_empty()));
            }
            segments.push(&self.mapping.plural(model));
            if let Some(id) = id {
                segments.push(id);
            }
        }
        url
    }

    fn wrap(&self, model: &ModelType, body: Value) -> Value {
        if self.root_envelope {
            let mut root = Map::new();
            root.insert(self.mapping.singular(model), body);
            Value::Object(root)
        } else {
            body
        }
    }

    fn wrap_many(&self, model: &ModelType, bodies: Vec<Value>) -> Value {
        if self.root_envelope {
            let mut root = Map::new();
            root.insert(self.mapping.plural(model), Value::Array(bodies));
            Value::Object(root)
        } else {
            Value::Array(bodies)
        }
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<(StatusCode, String), AdapterError> {
        tracing::debug!(adapter = "rest", %method, %url, "Sending request");

        let mut builder = self.client.request(method.clone(), url.clone());
        if let Some(body) = &body {
            builder = builder.json(body);
        }

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        match timeout(self.timeout, exchange).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                tracing::warn!(adapter = "rest", %method, %url, error = %e, "Request failed");
                Err(AdapterError::NetworkFailure(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(adapter = "rest", %method, %url, "Request timed out");
                Err(AdapterError::NetworkFailure(format!(
                    "Request timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }

    async fn call(
        &self,
        op: Operation,
        method: Method,
        model: &ModelType,
        id: Option<&str>,
        body: Option<Value>,
    ) -> Result<Value, AdapterError> {
        let url = match id {
            Some(id) => self.member_url(model, id),
            None => self.collection_url(model),
        };
        let (status, text) = self.send(method, url, body).await?;
        classify(op, model, id, status, text)
    }

    fn split_collection(
        &self,
        model: &ModelType,
        doc: Value,
        expected: usize,
    ) -> Result<Vec<Value>, AdapterError> {
        let items = match doc {
            Value::Null => return Ok(vec![Value::Null; expected]),
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove(&self.mapping.plural(model)) {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(AdapterError::Decode(format!(
                        "expected '{}' array in bulk response",
                        self.mapping.plural(model)
                    )))
                }
            },
            other => {
                return Err(AdapterError::Decode(format!(
                    "expected array in bulk response, got {}",
                    other
                )))
            }
        };
        if items.len() != expected {
            return Err(AdapterError::Decode(format!(
                "bulk response has {} entries for {} records",
                items.len(),
                expected
            )));
        }
        Ok(items)
    }
}

fn classify(
    op: Operation,
    model: &ModelType,
    id: Option<&str>,
    status: StatusCode,
    body: String,
) -> Result<Value, AdapterError> {
    if status.is_success() {
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_str(&body).map_err(|e| AdapterError::Decode(e.to_string()));
    }

    tracing::warn!(
        adapter = "rest",
        model = %model,
        status = status.as_u16(),
        "Server rejected request"
    );

    if status == StatusCode::NOT_FOUND {
        return Err(AdapterError::NotFound {
            model: model.to_string(),
            id: id.unwrap_or_default().to_string(),
        });
    }
    if op == Operation::Write && status.is_client_error() {
        return Err(AdapterError::ValidationFailed {
            status: status.as_u16(),
            errors: parse_field_errors(&body),
            body,
        });
    }
    Err(AdapterError::Http {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Adapter for RestAdapter {
    fn name(&self) -> &'static str {
        "rest"
    }

    fn mapping(&self) -> &ResourceMapping {
        &self.mapping
    }

    fn bulk_commit(&self) -> bool {
        self.bulk_commit
    }

    async fn fetch(&self, model: &ModelType, id: &str) -> Result<Value, AdapterError> {
        self.call(Operation::Read, Method::GET, model, Some(id), None)
            .await
    }

    async fn fetch_all(&self, model: &ModelType) -> Result<Value, AdapterError> {
        self.call(Operation::Read, Method::GET, model, None, None).await
    }

    async fn create(&self, model: &ModelType, body: Value) -> Result<Value, AdapterError> {
        let body = self.wrap(model, body);
        self.call(Operation::Write, Method::POST, model, None, Some(body))
            .await
    }

    async fn update(&self, model: &ModelType, id: &str, body: Value) -> Result<Value, AdapterError> {
        let body = self.wrap(model, body);
        self.call(Operation::Write, Method::PUT, model, Some(id), Some(body))
            .await
    }

    async fn delete(&self, model: &ModelType, id: &str) -> Result<(), AdapterError> {
        self.call(Operation::Delete, Method::DELETE, model, Some(id), None)
            .await
            .map(|_| ())
    }

    async fn create_many(
        &self,
        model: &ModelType,
        bodies: Vec<Value>,
    ) -> Result<Vec<Value>, AdapterError> {
        if !self.bulk_commit {
            let mut out = Vec::with_capacity(bodies.len());
            for body in bodies {
                out.push(self.create(model, body).await?);
            }
            return Ok(out);
        }
        let expected = bodies.len();
        let body = self.wrap_many(model, bodies);
        let doc = self
            .call(Operation::Write, Method::POST, model, None, Some(body))
            .await?;
        self.split_collection(model, doc, expected)
    }

    async fn update_many(
        &self,
        model: &ModelType,
        items: Vec<(String, Value)>,
    ) -> Result<Vec<Value>, AdapterError> {
        if !self.bulk_commit {
            let mut out = Vec::with_capacity(items.len());
            for (id, body) in items {
                out.push(self.update(model, &id, body).await?);
            }
            return Ok(out);
        }
        let expected = items.len();
        let bodies = items
            .into_iter()
            .map(|(id, mut body)| {
                if let Value::Object(map) = &mut body {
                    map.insert("id".to_string(), id_value(&id));
                }
                body
            })
            .collect();
        let body = self.wrap_many(model, bodies);
        let doc = self
            .call(Operation::Write, Method::PUT, model, None, Some(body))
            .await?;
        self.split_collection(model, doc, expected)
    }

    async fn delete_many(&self, model: &ModelType, ids: Vec<String>) -> Result<(), AdapterError> {
        if !self.bulk_commit {
            for id in ids {
                self.delete(model, &id).await?;
            }
            return Ok(());
        }
        let body = Value::Array(ids.iter().map(|id| id_value(id)).collect());
        self.call(Operation::Delete, Method::DELETE, model, None, Some(body))
            .await
            .map(|_| ())
    }
}
