//! Declarative model schemas.
//!
//! A [`Registry`] owns one [`ModelSchema`] per model type. Relationship
//! targets and inverses are resolved when the registry is built, so a
//! typo in a `has_many` target fails at startup instead of at first access.

mod registry;
mod types;

pub use registry::{Registry, RegistryBuilder, SchemaError};
pub use types::{AttrType, AttributeDef, ModelSchema, ModelType, RelationshipDef, RelationshipKind};
