//! Controller Configuration
//!
//! Static configuration loaded once at startup: the list of storage backends
//! and the tunables of the volume workflows. JSON and YAML files are accepted,
//! chosen by file extension.

use crate::domain::ports::{BackendFamily, SupportLevel};
use crate::error::{Error, Result};
use crate::utils::naming::HANDLE_SEPARATOR;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

// =============================================================================
// Controller Configuration
// =============================================================================

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ControllerConfig {
    /// Configured storage arrays
    pub backends: Vec<BackendConfig>,
    /// Workflow tunables
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

impl ControllerConfig {
    /// Load from a `.json`, `.yaml` or `.yml` file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&data)?,
            _ => Self::from_json_str(&data)?,
        };

        info!(
            "Loaded configuration from {} ({} backends)",
            path.display(),
            config.backends.len()
        );
        Ok(config)
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn from_yaml_str(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }
}

// =============================================================================
// Backend Configuration
// =============================================================================

/// Pool a backend is expected to report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSeed {
    pub name: String,
    #[serde(default)]
    pub capacity_bytes: u64,
}

/// One configured storage array
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BackendConfig {
    /// Unique backend name, first component of every volume handle
    pub name: String,
    /// Array family
    pub storage: BackendFamily,
    /// Management endpoints
    pub urls: Vec<String>,
    /// Management user
    #[serde(default)]
    pub user: Option<String>,
    /// Pools the array exposes
    #[serde(default)]
    pub pools: Vec<PoolSeed>,
    /// Feature flags the array reports
    #[serde(default)]
    pub features: BTreeMap<String, SupportLevel>,
    /// Array product version
    #[serde(default)]
    pub product_version: String,
    /// Lookups a cloned volume stays in copying state
    #[serde(default)]
    pub clone_copy_polls: u32,
}

impl BackendConfig {
    /// Check the entry is structurally usable
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Configuration("Backend name must not be empty".into()));
        }
        if self.name.contains(HANDLE_SEPARATOR) {
            return Err(Error::Configuration(format!(
                "Backend name {} must not contain '{}'",
                self.name, HANDLE_SEPARATOR
            )));
        }
        if self.urls.is_empty() {
            return Err(Error::Configuration(format!(
                "Backend {} must configure at least one url",
                self.name
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Workflow Configuration
// =============================================================================

/// Tunables for the volume workflows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfig {
    /// How long to wait for a clone copy to finish
    #[serde(default = "default_clone_wait_timeout_secs")]
    pub clone_wait_timeout_secs: u64,
    /// Poll interval while waiting for a clone copy
    #[serde(default = "default_clone_wait_interval_ms")]
    pub clone_wait_interval_ms: u64,
}

impl WorkflowConfig {
    pub fn clone_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_wait_timeout_secs)
    }

    pub fn clone_wait_interval(&self) -> Duration {
        Duration::from_millis(self.clone_wait_interval_ms)
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            clone_wait_timeout_secs: default_clone_wait_timeout_secs(),
            clone_wait_interval_ms: default_clone_wait_interval_ms(),
        }
    }
}

fn default_clone_wait_timeout_secs() -> u64 {
    6 * 60 * 60
}

fn default_clone_wait_interval_ms() -> u64 {
    5000
}
