//! Rollcall CLI Configuration Management
//!
//! Configuration is read from a TOML file: the path given with `--config`, or
//! `<config dir>/rollcall/config.toml` when present. Missing sections and keys
//! take their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use rollcall_ble::{BeaconIdentity, EngineConfig};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the rollcall CLI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Presence engine settings
    pub engine: EngineConfig,

    /// Default subject identity
    pub identity: IdentityConfig,

    /// CLI-specific settings
    pub cli: CliConfig,
}

/// Subject identity used when the command line gives none
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub subject_id: Option<String>,
    pub subject_label: Option<String>,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Enable verbose logging output
    pub verbose: bool,

    /// Print JSON lines instead of text
    pub json_output: bool,
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load the default configuration file if it exists, else use defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::FileSystem(format!("Failed to read {}: {}", path.as_ref().display(), e))
        })?;

        let config = Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::Loading(msg) => {
                ConfigError::Loading(format!("Failed to load from {}: {}", path.as_ref().display(), msg))
            }
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Loading(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let base = dirs::config_dir().ok_or_else(|| {
            ConfigError::Environment("No configuration directory for this user".to_string())
        })?;
        Ok(base.join("rollcall").join("config.toml"))
    }

    /// Save configuration to a specific file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::FileSystem(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), toml_string)
            .map_err(|e| ConfigError::FileSystem(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if let Some(subject_id) = &self.identity.subject_id {
            BeaconIdentity::new(subject_id.clone(), String::new())
                .map_err(|e| ConfigError::Validation(e.to_string()))?;
        }

        Ok(())
    }

    /// Resolve the subject identity, command-line values taking precedence
    pub fn beacon_identity(
        &self,
        subject_id: Option<&str>,
        subject_label: Option<&str>,
    ) -> Result<BeaconIdentity, ConfigError> {
        let id = subject_id
            .map(str::to_string)
            .or_else(|| self.identity.subject_id.clone())
            .ok_or_else(|| {
                ConfigError::Validation(
                    "No subject id: pass --id or set identity.subject_id".to_string(),
                )
            })?;
        let label = subject_label
            .map(str::to_string)
            .or_else(|| self.identity.subject_label.clone())
            .unwrap_or_default();

        BeaconIdentity::new(id, label).map_err(|e| ConfigError::Validation(e.to_string()))
    }

    /// Example configuration with a placeholder identity
    pub fn example() -> Self {
        AppConfig {
            identity: IdentityConfig {
                subject_id: Some("12345".to_string()),
                subject_label: Some("John Doe".to_string()),
            },
            ..Default::default()
        }
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::example())
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
