//! Persistence adapters.
//!
//! An [`Adapter`] translates store operations into wire calls and hands
//! back raw JSON documents; the [`Serializer`](crate::serializer::Serializer)
//! turns those into record payloads.

mod fixture;
mod mapping;
mod rest;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::schema::ModelType;

pub use fixture::{FixtureAdapter, FixtureRequest};
pub use mapping::{pluralize, underscore, ResourceMapping, ResourceNames};
pub use rest::{RestAdapter, RestAdapterBuilder};

/// Server-provided validation messages keyed by field.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Errors surfaced by adapters.
///
/// `Clone` so a single failure can be stored on the record and handed to
/// every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdapterError {
    #[error("{model} '{id}' not found")]
    NotFound { model: String, id: String },

    #[error("Validation failed with status {status}: {body}")]
    ValidationFailed {
        status: u16,
        errors: FieldErrors,
        body: String,
    },

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Unexpected response status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid response payload: {0}")]
    Decode(String),
}

impl AdapterError {
    pub fn status(&self) -> Option<u16> {
        match self {
            AdapterError::NotFound { .. } => Some(404),
            AdapterError::ValidationFailed { status, .. } | AdapterError::Http { status, .. } => {
                Some(*status)
            }
            AdapterError::NetworkFailure(_) | AdapterError::Decode(_) => None,
        }
    }

    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            AdapterError::ValidationFailed { errors, .. } => Some(errors),
            _ => None,
        }
    }
}

/// Parse `{"errors": {"field": ["msg", ...]}}` bodies.
///
/// A bare string per field and a top-level `errors` array (stored under
/// `base`) are accepted as well. Anything else yields an empty map.
pub fn parse_field_errors(body: &str) -> FieldErrors {
    let mut out = FieldErrors::new();
    let Ok(doc) = serde_json::from_str::<Value>(body) else {
        return out;
    };
    match doc.get("errors") {
        Some(Value::Object(fields)) => {
            for (field, messages) in fields {
                let messages = match messages {
                    Value::Array(items) => items.iter().map(message_text).collect(),
                    other => vec![message_text(other)],
                };
                out.insert(field.clone(), messages);
            }
        }
        Some(Value::Array(items)) => {
            out.insert("base".to_string(), items.iter().map(message_text).collect());
        }
        _ => {}
    }
    out
}

fn message_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Store-facing persistence interface.
///
/// The batched methods default to one call per record; adapters that can
/// send a whole batch in one request override them and report
/// [`Adapter::bulk_commit`].
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Model to resource naming table.
    fn mapping(&self) -> &ResourceMapping;

    fn bulk_commit(&self) -> bool {
        false
    }

    async fn fetch(&self, model: &ModelType, id: &str) -> Result<Value, AdapterError>;

    async fn fetch_all(&self, model: &ModelType) -> Result<Value, AdapterError>;

    /// Returns the created resource, which must carry the assigned id.
    async fn create(&self, model: &ModelType, body: Value) -> Result<Value, AdapterError>;

    /// May return `Value::Null` when the server answers without a body.
    async fn update(&self, model: &ModelType, id: &str, body: Value) -> Result<Value, AdapterError>;

    async fn delete(&self, model: &ModelType, id: &str) -> Result<(), AdapterError>;

    /// One resource document per body, in input order.
    async fn create_many(
        &self,
        model: &ModelType,
        bodies: Vec<Value>,
    ) -> Result<Vec<Value>, AdapterError> {
        let mut out = Vec::with_capacity(bodies.len());
        for body in bodies {
            out.push(self.create(model, body).await?);
        }
        Ok(out)
    }

    async fn update_many(
        &self,
        model: &ModelType,
        items: Vec<(String, Value)>,
    ) -> Result<Vec<Value>, AdapterError> {
        let mut out = Vec::with_capacity(items.len());
        for (id, body) in items {
            out.push(self.update(model, &id, body).await?);
        }
        Ok(out)
    }

    async fn delete_many(&self, model: &ModelType, ids: Vec<String>) -> Result<(), AdapterError> {
        for id in ids {
            self.delete(model, &id).await?;
        }
        Ok(())
    }
}
