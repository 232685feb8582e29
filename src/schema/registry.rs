use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;

use crate::config::ModelConfig;
use crate::schema::types::{ModelSchema, ModelType, RelationshipDef, RelationshipKind};

/// Errors raised while building a [`Registry`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Model '{model}' is registered twice")]
    DuplicateModel { model: String },

    #[error("Model '{model}' declares '{field}' more than once")]
    DuplicateField { model: String, field: String },

    #[error("Relationship '{model}.{relationship}' targets unknown model '{target}'")]
    UnknownTarget {
        model: String,
        relationship: String,
        target: String,
    },

    #[error("Relationship '{model}.{relationship}' has no belongs_to on '{target}' pointing back")]
    MissingInverse {
        model: String,
        relationship: String,
        target: String,
    },

    #[error("Relationship '{model}.{relationship}' names inverse '{inverse}' which does not point back")]
    InvalidInverse {
        model: String,
        relationship: String,
        inverse: String,
    },
}

/// Immutable set of model schemas.
#[derive(Debug, Default)]
pub struct Registry {
    models: HashMap<ModelType, Arc<ModelSchema>>,
    order: Vec<ModelType>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Build a registry from `[[models]]` config entries.
    pub fn from_config(models: &[ModelConfig]) -> Result<Self, SchemaError> {
        let mut builder = Self::builder();
        for model in models {
            let mut schema = ModelSchema::build(model.name.as_str());
            for attr in &model.attributes {
                schema = schema.attr(attr.name.as_str(), attr.kind);
            }
            for rel in &model.relationships {
                let mut def = match rel.kind {
                    RelationshipKind::BelongsTo => {
                        RelationshipDef::belongs_to(rel.name.as_str(), rel.target.as_str())
                    }
                    RelationshipKind::HasMany => {
                        RelationshipDef::has_many(rel.name.as_str(), rel.target.as_str())
                    }
                };
                if let Some(key) = &rel.key {
                    def = def.with_key(key.as_str());
                }
                if let Some(inverse) = &rel.inverse {
                    def = def.with_inverse(inverse.as_str());
                }
                schema = schema.relationship(def);
            }
            builder = builder.model(schema);
        }
        builder.build()
    }

    pub fn get(&self, model: &ModelType) -> Option<&Arc<ModelSchema>> {
        self.models.get(model)
    }

    pub fn contains(&self, model: &ModelType) -> bool {
        self.models.contains_key(model)
    }

    /// Model types in registration order.
    pub fn models(&self) -> impl Iterator<Item = &ModelType> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    schemas: Vec<ModelSchema>,
}

impl RegistryBuilder {
    pub fn model(mut self, schema: ModelSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Validate every schema and resolve relationship inverses.
    pub fn build(self) -> Result<Registry, SchemaError> {
        let mut seen = HashSet::new();
        for schema in &self.schemas {
            if !seen.insert(schema.name().clone()) {
                return Err(SchemaError::DuplicateModel {
                    model: schema.name().to_string(),
                });
            }
            check_fields(schema)?;
        }

        // Inverses are looked up against the declarations as written.
        let declared: HashMap<ModelType, ModelSchema> = self
            .schemas
            .iter()
            .map(|s| (s.name().clone(), s.clone()))
            .collect();

        let mut registry = Registry::default();
        for mut schema in self.schemas {
            let owner = schema.name().clone();
            for rel in schema.relationships_mut() {
                let target = declared.get(&rel.target).ok_or_else(|| SchemaError::UnknownTarget {
                    model: owner.to_string(),
                    relationship: rel.name.clone(),
                    target: rel.target.to_string(),
                })?;
                resolve_inverse(&owner, rel, target)?;
            }
            tracing::debug!(
                model = %owner,
                attributes = schema.attributes().len(),
                relationships = schema.relationships().len(),
                "Registered model"
            );
            registry.order.push(owner.clone());
            registry.models.insert(owner, Arc::new(schema));
        }
        Ok(registry)
    }
}

fn check_fields(schema: &ModelSchema) -> Result<(), SchemaError> {
    let mut names = HashSet::new();
    let fields = schema
        .attributes()
        .iter()
        .map(|a| a.name.as_str())
        .chain(schema.relationships().iter().map(|r| r.name.as_str()))
        .chain(schema.belongs_to_relationships().map(|r| r.key.as_str()));
    for field in fields {
        if !names.insert(field) {
            return Err(SchemaError::DuplicateField {
                model: schema.name().to_string(),
                field: field.to_string(),
            });
        }
    }
    Ok(())
}

fn resolve_inverse(
    owner: &ModelType,
    rel: &mut RelationshipDef,
    target: &ModelSchema,
) -> Result<(), SchemaError> {
    let wanted = match rel.kind {
        RelationshipKind::HasMany => RelationshipKind::BelongsTo,
        RelationshipKind::BelongsTo => RelationshipKind::HasMany,
    };
    let points_back = |r: &&RelationshipDef| r.kind == wanted && &r.target == owner;

    let inverse = match &rel.inverse {
        Some(name) => {
            let found = target
                .relationship_named(name)
                .filter(|r| points_back(r))
                .ok_or_else(|| SchemaError::InvalidInverse {
                    model: owner.to_string(),
                    relationship: rel.name.clone(),
                    inverse: name.clone(),
                })?;
            Some(found)
        }
        None => target.relationships().iter().find(points_back),
    };

    match (rel.kind, inverse) {
        (RelationshipKind::HasMany, Some(inverse)) => {
            rel.key = inverse.key.clone();
            rel.inverse = Some(inverse.name.clone());
        }
        (RelationshipKind::HasMany, None) => {
            return Err(SchemaError::MissingInverse {
                model: owner.to_string(),
                relationship: rel.name.clone(),
                target: target.name().to_string(),
            });
        }
        (RelationshipKind::BelongsTo, inverse) => {
            rel.inverse = inverse.map(|r| r.name.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttrType;

    fn photo() -> ModelSchema {
        ModelSchema::build("photo")
            .attr("title", AttrType::String)
            .attr("url", AttrType::String)
            .has_many("comments", "comment")
    }

    fn comment() -> ModelSchema {
        ModelSchema::build("comment")
            .attr("text", AttrType::String)
            .belongs_to("photo", "photo")
    }

    #[test]
    fn test_build_resolves_inverse() {
        let registry = Registry::builder()
            .model(photo())
            .model(comment())
            .build()
            .unwrap();

        let photo = registry.get(&ModelType::new("photo")).unwrap();
        let comments = photo.relationship_named("comments").unwrap();
        assert_eq!(comments.key, "photo_id");
        assert_eq!(comments.inverse.as_deref(), Some("photo"));

        let comment = registry.get(&ModelType::new("comment")).unwrap();
        let owner = comment.relationship_named("photo").unwrap();
        assert_eq!(owner.inverse.as_deref(), Some("comments"));
    }

    #[test]
    fn test_registration_order_is_kept() {
        let registry = Registry::builder()
            .model(photo())
            .model(comment())
            .build()
            .unwrap();
        let names: Vec<&str> = registry.models().map(|m| m.as_str()).collect();
        assert_eq!(names, vec!["photo", "comment"]);
    }

    #[test]
    fn test_unknown_target_fails_at_build() {
        let err = Registry::builder().model(photo()).build().unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnknownTarget {
                model: "photo".to_string(),
                relationship: "comments".to_string(),
                target: "comment".to_string(),
            }
        );
    }

    #[test]
    fn test_has_many_without_inverse_fails() {
        let orphan = ModelSchema::build("comment").attr("text", AttrType::String);
        let err = Registry::builder()
            .model(photo())
            .model(orphan)
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::MissingInverse { .. }));
    }

    #[test]
    fn test_explicit_inverse_must_point_back() {
        let photo = ModelSchema::build("photo")
            .relationship(RelationshipDef::has_many("comments", "comment").with_inverse("text"));
        let err = Registry::builder()
            .model(photo)
            .model(comment())
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidInverse { .. }));
    }

    #[test]
    fn test_duplicate_model_and_field() {
        let err = Registry::builder()
            .model(comment())
            .model(comment())
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateModel { .. }));

        let clash = ModelSchema::build("comment")
            .attr("photo_id", AttrType::Number)
            .belongs_to("photo", "photo");
        let err = Registry::builder()
            .model(photo())
            .model(clash)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::DuplicateField {
                model: "comment".to_string(),
                field: "photo_id".to_string(),
            }
        );
    }
}
