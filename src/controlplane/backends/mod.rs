//! Storage Backend Adapters
//!
//! Provides [`ArrayClient`](crate::domain::ports::ArrayClient) adapters for the
//! configured arrays. Every family is served by the simulated adapter, which
//! keeps volume and snapshot state in memory.

pub mod simulated;

pub use simulated::*;

use crate::config::BackendConfig;
use crate::domain::ports::{ArrayCapabilities, ArrayClientRef, Pool};
use crate::error::Result;
use std::sync::Arc;
use tracing::info;

/// Factory for creating array clients
pub struct BackendFactory;

impl BackendFactory {
    /// Create the client for a configured backend
    pub fn create(config: &BackendConfig) -> Result<ArrayClientRef> {
        Ok(Arc::new(Self::simulated(config)?))
    }

    /// Create a simulated array seeded from `config`
    pub fn simulated(config: &BackendConfig) -> Result<SimulatedArray> {
        config.validate()?;

        info!(
            "Creating {} client for backend {} ({} endpoints)",
            config.storage,
            config.name,
            config.urls.len()
        );

        // In a real implementation, this would log in to the first reachable
        // url with the configured user. For now the array is kept in memory.
        let pools = config
            .pools
            .iter()
            .enumerate()
            .map(|(index, seed)| Pool {
                id: index.to_string(),
                name: seed.name.clone(),
                capacity_bytes: seed.capacity_bytes,
            })
            .collect();

        let capabilities = ArrayCapabilities {
            pools,
            features: config.features.clone(),
            product_version: config.product_version.clone(),
        };

        Ok(
            SimulatedArray::new(config.name.clone(), config.storage, capabilities)
                .with_clone_copy_polls(config.clone_copy_polls),
        )
    }
}
