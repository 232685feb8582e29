use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of a registered model (e.g. `photo`, `comment`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelType(Arc<str>);

impl ModelType {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ModelType {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<&ModelType> for ModelType {
    fn from(model: &ModelType) -> Self {
        model.clone()
    }
}

/// Primitive attribute types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrType {
    String,
    Number,
    Boolean,
    /// ISO-8601 date or timestamp carried as a string.
    Date,
}

impl AttrType {
    pub fn name(&self) -> &'static str {
        match self {
            AttrType::String => "string",
            AttrType::Number => "number",
            AttrType::Boolean => "boolean",
            AttrType::Date => "date",
        }
    }

    /// Whether `value` can be stored in an attribute of this type.
    ///
    /// `null` is accepted by every type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (AttrType::String, Value::String(_)) => true,
            (AttrType::Number, Value::Number(_)) => true,
            (AttrType::Boolean, Value::Bool(_)) => true,
            (AttrType::Date, Value::String(s)) => looks_like_date(s),
            _ => false,
        }
    }
}

fn looks_like_date(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 10
        && b[..4].iter().all(u8::is_ascii_digit)
        && b[4] == b'-'
        && b[5..7].iter().all(u8::is_ascii_digit)
        && b[7] == b'-'
        && b[8..10].iter().all(u8::is_ascii_digit)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    HasMany,
    BelongsTo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDef {
    pub name: String,
    pub kind: AttrType,
}

/// A relationship between two registered models.
///
/// For `belongs_to`, `key` is the foreign-key attribute carried on the wire
/// (`photo_id`). For `has_many`, `key` and `inverse` are filled in by the
/// registry from the target's matching `belongs_to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDef {
    pub name: String,
    pub kind: RelationshipKind,
    pub target: ModelType,
    pub key: String,
    pub inverse: Option<String>,
}

impl RelationshipDef {
    pub fn belongs_to(name: impl Into<String>, target: impl Into<ModelType>) -> Self {
        let name = name.into();
        Self {
            key: format!("{}_id", name),
            name,
            kind: RelationshipKind::BelongsTo,
            target: target.into(),
            inverse: None,
        }
    }

    pub fn has_many(name: impl Into<String>, target: impl Into<ModelType>) -> Self {
        Self {
            name: name.into(),
            kind: RelationshipKind::HasMany,
            target: target.into(),
            key: String::new(),
            inverse: None,
        }
    }

    /// Override the foreign-key attribute name of a `belongs_to`.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Name the relationship on the target that points back at this one.
    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    pub fn is_belongs_to(&self) -> bool {
        self.kind == RelationshipKind::BelongsTo
    }

    pub fn is_has_many(&self) -> bool {
        self.kind == RelationshipKind::HasMany
    }
}

/// Schema of one model type: ordered attributes plus relationships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSchema {
    name: ModelType,
    attributes: Vec<AttributeDef>,
    relationships: Vec<RelationshipDef>,
}

impl ModelSchema {
    pub fn build(name: impl Into<ModelType>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>, kind: AttrType) -> Self {
        self.attributes.push(AttributeDef {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn belongs_to(self, name: impl Into<String>, target: impl Into<ModelType>) -> Self {
        self.relationship(RelationshipDef::belongs_to(name, target))
    }

    pub fn has_many(self, name: impl Into<String>, target: impl Into<ModelType>) -> Self {
        self.relationship(RelationshipDef::has_many(name, target))
    }

    pub fn relationship(mut self, def: RelationshipDef) -> Self {
        self.relationships.push(def);
        self
    }

    pub fn name(&self) -> &ModelType {
        &self.name
    }

    pub fn attributes(&self) -> &[AttributeDef] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn relationships(&self) -> &[RelationshipDef] {
        &self.relationships
    }

    pub fn relationship_named(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn belongs_to_relationships(&self) -> impl Iterator<Item = &RelationshipDef> {
        self.relationships.iter().filter(|r| r.is_belongs_to())
    }

    /// Find the `belongs_to` whose foreign key is `key`.
    pub fn belongs_to_by_key(&self, key: &str) -> Option<&RelationshipDef> {
        self.belongs_to_relationships().find(|r| r.key == key)
    }

    pub(super) fn relationships_mut(&mut self) -> &mut [RelationshipDef] {
        &mut self.relationships
    }
}
