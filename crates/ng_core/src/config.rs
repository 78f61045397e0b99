//! Configuration management for the ng_core resource process.
//!
//! Settings are loaded from a TOML file, then overridden by command-line
//! arguments and validated before the kernel is built.

use crate::cli::CliArgs;
use ng_kernel::Level;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

fn default_resource_name() -> String {
    "ng_core".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub resource: ResourceSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub modules: ModuleSettings,
}

/// Process identity and packaging metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSettings {
    /// Name other resources use to reach this process
    #[serde(default = "default_resource_name")]
    pub name: String,
    /// Reported through `GetVersion`
    #[serde(default = "default_version")]
    pub version: String,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            name: default_resource_name(),
            version: default_version(),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Kernel logger threshold (trace, debug, info, success, warn, error, fatal)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

/// Built-in module configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleSettings {
    /// Each entry becomes a passive configuration module under its key
    #[serde(default)]
    pub passive: BTreeMap<String, toml::Value>,
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is written at
    /// `path` and the defaults are returned.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if let Some(resource) = &args.resource {
            self.resource.name = resource.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.resource.name.trim().is_empty() {
            return Err("Resource name cannot be empty".to_string());
        }

        if self.log_level().is_err() {
            return Err(format!(
                "Invalid log level: {}. Must be one of: trace, debug, info, success, warn, error, fatal",
                self.logging.level
            ));
        }

        if self.modules.passive.keys().any(|name| name.trim().is_empty()) {
            return Err("Passive module names cannot be empty".to_string());
        }

        Ok(())
    }

    pub fn log_level(&self) -> Result<Level, ng_kernel::KernelError> {
        self.logging.level.parse()
    }

    /// Host metadata handed to the kernel.
    pub fn metadata(&self) -> HashMap<String, String> {
        HashMap::from([("version".to_string(), self.resource.version.clone())])
    }

    /// Passive module values converted to JSON.
    pub fn passive_modules(&self) -> Result<Vec<(String, serde_json::Value)>, serde_json::Error> {
        self.modules
            .passive
            .iter()
            .map(|(name, value)| Ok((name.clone(), serde_json::to_value(value)?)))
            .collect()
    }
}
