//! JSON document normalization and record serialization.
//!
//! Accepted read shapes, for a `photo` model:
//!
//! ```text
//! {"id": 1, "title": "A"}                          bare resource
//! [{"id": 1}, {"id": 2}]                           bare collection
//! {"photo": {...}, "comments": [...]}              envelope + sideloads
//! {"photos": [...]}                                collection envelope
//! {"id": 1, "comments": [{"id": 5, "text": ".."}]} embedded has_many
//! {"id": 5, "photo": {"id": 1, ...}}               embedded belongs_to
//! ```
//!
//! Embedded and sideloaded resources end up in [`Normalized::included`] and
//! are merged into the store as records of their own.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::adapter::{AdapterError, ResourceMapping};
use crate::record::{Id, Record};
use crate::schema::{ModelType, Registry, RelationshipKind};

/// One resource pulled out of a server document.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourcePayload {
    pub model: ModelType,
    pub id: Option<String>,
    /// Declared attributes present in the payload.
    pub attributes: Map<String, Value>,
    /// belongs_to relationship name to owner id (`None` for explicit null).
    pub links: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Default)]
pub struct Normalized {
    pub primary: Vec<ResourcePayload>,
    pub included: Vec<ResourcePayload>,
}

pub struct Serializer {
    registry: Arc<Registry>,
    mapping: ResourceMapping,
}

impl Serializer {
    pub fn new(registry: Arc<Registry>, mapping: ResourceMapping) -> Self {
        Self { registry, mapping }
    }

    pub fn normalize(&self, model: &ModelType, doc: Value) -> Result<Normalized, AdapterError> {
        let mut out = Normalized::default();
        match doc {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    let payload = self.resource(model, item, &mut out.included)?;
                    out.primary.push(payload);
                }
            }
            Value::Object(mut map) => {
                let names = self.mapping.names(model);
                let root = map
                    .remove(&names.plural)
                    .or_else(|| map.remove(&names.singular));
                let Some(root) = root else {
                    let payload = self.resource(model, Value::Object(map), &mut out.included)?;
                    out.primary.push(payload);
                    return Ok(out);
                };

                match root {
                    Value::Array(items) => {
                        for item in items {
                            let payload = self.resource(model, item, &mut out.included)?;
                            out.primary.push(payload);
                        }
                    }
                    Value::Null => {}
                    item => {
                        let payload = self.resource(model, item, &mut out.included)?;
                        out.primary.push(payload);
                    }
                }

                for (key, value) in map {
                    let Some(side) = self.mapping.model_for_root(self.registry.models(), &key) else {
                        tracing::trace!(model = %model, key = %key, "Ignoring unknown root key");
                        continue;
                    };
                    let items = match value {
                        Value::Array(items) => items,
                        item @ Value::Object(_) => vec![item],
                        _ => continue,
                    };
                    for item in items {
                        let payload = self.resource(&side, item, &mut out.included)?;
                        out.included.push(payload);
                    }
                }
            }
            other => {
                return Err(AdapterError::Decode(format!(
                    "expected object or array for '{}', got {}",
                    model, other
                )))
            }
        }
        Ok(out)
    }

    fn resource(
        &self,
        model: &ModelType,
        value: Value,
        included: &mut Vec<ResourcePayload>,
    ) -> Result<ResourcePayload, AdapterError> {
        let schema = self
            .registry
            .get(model)
            .ok_or_else(|| AdapterError::Decode(format!("unknown model '{}'", model)))?;
        let Value::Object(obj) = value else {
            return Err(AdapterError::Decode(format!(
                "expected '{}' resource object",
                model
            )));
        };

        let id = obj.get("id").and_then(value_to_id);
        let mut payload = ResourcePayload {
            model: model.clone(),
            id: id.clone(),
            attributes: Map::new(),
            links: BTreeMap::new(),
        };

        for attr in schema.attributes() {
            if let Some(value) = obj.get(&attr.name) {
                payload.attributes.insert(attr.name.clone(), value.clone());
            }
        }

        for rel in schema.relationships() {
            match rel.kind {
                RelationshipKind::BelongsTo => {
                    if let Some(owner) = obj.get(&rel.key) {
                        payload.links.insert(rel.name.clone(), value_to_id(owner));
                    } else if let Some(owner) = obj.get(&rel.name) {
                        let owner_id = if owner.is_object() {
                            let embedded = self.resource(&rel.target, owner.clone(), included)?;
                            let owner_id = embedded.id.clone();
                            included.push(embedded);
                            owner_id
                        } else {
                            value_to_id(owner)
                        };
                        payload.links.insert(rel.name.clone(), owner_id);
                    }
                }
                RelationshipKind::HasMany => {
                    // Scalar id lists are ignored: membership is derived from
                    // the children's foreign keys.
                    let Some(Value::Array(items)) = obj.get(&rel.name) else {
                        continue;
                    };
                    for item in items.iter().filter(|item| item.is_object()) {
                        let mut child = self.resource(&rel.target, item.clone(), included)?;
                        if let (Some(inverse), Some(parent)) = (&rel.inverse, &id) {
                            child
                                .links
                                .entry(inverse.clone())
                                .or_insert_with(|| Some(parent.clone()));
                        }
                        included.push(child);
                    }
                }
            }
        }

        Ok(payload)
    }

    /// Declared attributes plus belongs_to foreign keys. Owners that have
    /// no server id yet are written as `null`.
    pub fn serialize(&self, record: &Record) -> Value {
        let schema = record.schema();
        let data = record.data();
        let mut body = Map::new();

        for attr in schema.attributes() {
            if let Some(value) = data.current.attributes.get(&attr.name) {
                body.insert(attr.name.clone(), value.clone());
            }
        }
        for rel in schema.belongs_to_relationships() {
            let value = match data.current.links.get(&rel.name) {
                Some(Some(Id::Server(id))) => id_value(id),
                Some(_) => Value::Null,
                None => continue,
            };
            body.insert(rel.key.clone(), value);
        }
        Value::Object(body)
    }
}

/// Ids are kept as strings; numbers are accepted on the wire.
pub fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numeric ids go back out as JSON numbers. Only canonical decimals
/// qualify, so `"007"` stays a string.
pub fn id_value(id: &str) -> Value {
    match id.parse::<u64>() {
        Ok(n) if n.to_string() == id => Value::from(n),
        _ => Value::String(id.to_string()),
    }
}
