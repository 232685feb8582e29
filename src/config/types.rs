use serde::{Deserialize, Serialize};

use crate::schema::{AttrType, RelationshipKind};

/// Root configuration container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Per-model resource naming overrides.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    /// Model schemas registered at startup.
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

/// REST adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Server root (e.g., "http://localhost:3000").
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Optional path prefix inserted before resource paths (e.g., "api/v1").
    #[serde(default)]
    pub namespace: Option<String>,
    /// Total request timeout in seconds (default: 30).
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,
    /// Connection timeout in seconds (default: 5).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    /// Send one request per model and operation in `commit_all`.
    #[serde(default)]
    pub bulk_commit: bool,
    /// Wrap write bodies as `{ "<singular>": {...} }`.
    #[serde(default)]
    pub root_envelope: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

/// Resource naming override for a single model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub model: String,
    #[serde(default)]
    pub singular: Option<String>,
    #[serde(default)]
    pub plural: Option<String>,
}

/// Declarative model schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeConfig>,
    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AttrType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipConfig {
    pub name: String,
    pub kind: RelationshipKind,
    pub target: String,
    /// Foreign-key attribute for `belongs_to` (default: `<name>_id`).
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub inverse: Option<String>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_timeout() -> u32 {
    30
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            namespace: None,
            timeout_seconds: default_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            bulk_commit: false,
            root_envelope: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}
