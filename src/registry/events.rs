//! Registry Events
//!
//! Events emitted by the backend registry for external consumers to react to
//! backend lifecycle and refresh outcomes.

use serde::{Deserialize, Serialize};

/// Events emitted by the backend registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RegistryEvent {
    /// A backend was registered at startup
    BackendRegistered { backend: String, family: String },

    /// A backend's pools and features were replaced
    CapabilitiesRefreshed { backend: String, pool_count: usize },

    /// A refresh of one backend failed; its previous state is kept
    RefreshFailed { backend: String, reason: String },
}

impl RegistryEvent {
    /// Get the backend name associated with this event
    pub fn backend(&self) -> &str {
        match self {
            RegistryEvent::BackendRegistered { backend, .. } => backend,
            RegistryEvent::CapabilitiesRefreshed { backend, .. } => backend,
            RegistryEvent::RefreshFailed { backend, .. } => backend,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RegistryEvent::RefreshFailed { .. })
    }
}
