//! Merged deployment configuration.
//!
//! A [`DeployConfig`] is what the config loader hands back for one system: the
//! kernel-level settings, the caller-declared container types, and any number of
//! system-level settings (`root`, `region`, `sshKeyPath`, ...) kept as free-form JSON.
//!
//! # File format
//!
//! ```toml
//! autoCheckoutDir = "/var/fleetwright/checkouts"
//! region = "eu-west-1"
//!
//! [kernel]
//! systemsRoot = "/var/fleetwright/systems"
//! mode = "preview"
//!
//! [[containers]]
//! type = "kafka"
//! require = "kafka-container"
//! specific = { brokers = 3 }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;

use crate::core::DeployError;
use crate::topology::Settings;

/// Settings key excluded from [`DeployConfig::fingerprint`].
pub const LOGGER_KEY: &str = "logger";

/// Configuration for one system, already merged across kernel, local and target overlays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Kernel-level settings, the last fallback for handler defaults
    #[serde(default)]
    pub kernel: KernelSettings,

    /// Caller-declared container types; looked up before the built-in table
    #[serde(default)]
    pub containers: Vec<ContainerTypeDefinition>,

    /// Directory for automatic checkouts, inherited from the kernel config when unset
    #[serde(default, rename = "autoCheckoutDir", skip_serializing_if = "Option::is_none")]
    pub auto_checkout_dir: Option<String>,

    /// System-level settings
    #[serde(flatten)]
    pub settings: Settings,
}

/// Kernel-level settings block (`[kernel]`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KernelSettings {
    settings: Settings,
}

/// A caller-declared container type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerTypeDefinition {
    /// Container type name used in system definitions
    #[serde(rename = "type")]
    pub container_type: String,

    /// Handler factory module reference
    pub require: String,

    /// Defaults handed to the handler factory
    #[serde(default)]
    pub specific: Settings,
}

impl ContainerTypeDefinition {
    pub fn new(container_type: impl Into<String>, require: impl Into<String>) -> Self {
        Self {
            container_type: container_type.into(),
            require: require.into(),
            specific: Settings::new(),
        }
    }
}

impl KernelSettings {
    /// Raw kernel setting by key.
    #[must_use]
    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    /// Sets a kernel setting, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.settings.insert(key.into(), value.into())
    }

    /// Root directory holding deployed systems.
    #[must_use]
    pub fn systems_root(&self) -> Option<&str> {
        self.setting("systemsRoot").and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn auto_checkout_dir(&self) -> Option<&str> {
        self.setting("autoCheckoutDir").and_then(Value::as_str).filter(|s| !s.is_empty())
    }
}

impl DeployConfig {
    /// Reads a configuration file in TOML format.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, or with [`DeployError::ConfigError`] if it is
    /// not valid TOML for this schema.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read deployment config from {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse deployment config from {}", path.display()))
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            DeployError::ConfigError {
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Raw system-level setting by key.
    #[must_use]
    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    /// Sets a system-level setting, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.settings.insert(key.into(), value.into())
    }

    /// Declared definition for a container type, if the caller declared one.
    #[must_use]
    pub fn declared(&self, container_type: &str) -> Option<&ContainerTypeDefinition> {
        self.containers.iter().find(|def| def.container_type == container_type)
    }

    /// Hex SHA-256 of the JSON form of this configuration, minus the `logger` entry.
    ///
    /// Two configurations with the same fingerprint build identical handlers. Object
    /// keys serialize in sorted order, so the value does not depend on load order.
    pub fn fingerprint(&self) -> Result<String> {
        let mut value = serde_json::to_value(self).context("Failed to serialize configuration")?;
        if let Some(map) = value.as_object_mut() {
            map.remove(LOGGER_KEY);
        }

        let bytes = serde_json::to_vec(&value).context("Failed to serialize configuration")?;
        let digest = Sha256::digest(&bytes);
        Ok(hex::encode(digest))
    }
}

/// Whether a setting counts as present when layering defaults.
///
/// `null`, `false`, `0` and the empty string count as unset, so a lower layer wins
/// over them.
#[must_use]
pub fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
