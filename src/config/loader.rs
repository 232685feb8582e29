use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::adapter::ResourceMapping;
use crate::config::types::Config;
use crate::schema::ModelType;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

impl Config {
    /// Returns the path to the configuration file.
    ///
    /// Uses `~/.config/modelsync/config.toml` on Unix/macOS,
    /// or equivalent on other platforms via `dirs::config_dir()`.
    /// Falls back to current directory if config_dir is unavailable.
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("modelsync").join("config.toml")
    }

    /// Loads, parses and validates the config file at `path`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - The adapter base URL is an http(s) URL
    /// - The request timeout is non-zero
    /// - Model names are unique
    /// - No two models share a plural resource name
    /// - Resource overrides name a declared model (when models are declared)
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = &self.adapter.base_url;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::ValidationError {
                message: format!("Adapter base_url '{}' must be an http(s) URL", base_url),
            });
        }

        if self.adapter.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError {
                message: "Adapter timeout_seconds must be greater than zero".to_string(),
            });
        }

        let mut names = HashSet::new();
        for model in &self.models {
            if !names.insert(model.name.as_str()) {
                return Err(ConfigError::ValidationError {
                    message: format!("Model '{}' is declared more than once", model.name),
                });
            }
        }

        let mapping = ResourceMapping::from_config(&self.resources);
        let mut plurals: HashMap<String, &str> = HashMap::new();
        for model in &self.models {
            let plural = mapping.plural(&ModelType::new(model.name.as_str()));
            if let Some(other) = plurals.insert(plural.clone(), model.name.as_str()) {
                return Err(ConfigError::ValidationError {
                    message: format!(
                        "Models '{}' and '{}' both map to resource '{}'",
                        other, model.name, plural
                    ),
                });
            }
        }

        if !self.models.is_empty() {
            if let Some(resource) = self
                .resources
                .iter()
                .find(|r| !names.contains(r.model.as_str()))
            {
                return Err(ConfigError::ValidationError {
                    message: format!(
                        "Resource override for '{}' does not match any declared model",
                        resource.model
                    ),
                });
            }
        }

        Ok(())
    }
}
