//! Simulated Array Adapter
//!
//! In-memory implementation of [`ArrayClient`] for every backend family.
//! Volumes and snapshots are tracked internally; pools, feature flags and the
//! product version come from the backend configuration. Calls are recorded
//! and individual operations can be made to fail.

use crate::domain::ports::{
    ArrayCapabilities, ArrayClient, BackendFamily, CreateVolumeParams, Volume, VolumeStatus,
    Pool,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, info};

// =============================================================================
// Operations
// =============================================================================

/// Array operations, for call recording and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArrayOperation {
    GetPoolByName,
    GetVolumeByName,
    CreateVolume,
    CreateVolumeFromSnapshot,
    CreateSnapshot,
    DeleteSnapshot,
    DeleteVolume,
    GetCapabilities,
}

// =============================================================================
// Array State
// =============================================================================

#[derive(Debug, Clone)]
struct VolumeState {
    volume: Volume,
    /// Lookups left before a clone copy reports ready
    copy_polls_left: u32,
    clone_speed: Option<u8>,
}

#[derive(Debug, Clone)]
struct SnapshotState {
    source_volume: String,
    capacity_bytes: u64,
    pool_id: String,
}

#[derive(Debug, Default)]
struct ArrayState {
    volumes: BTreeMap<String, VolumeState>,
    snapshots: BTreeMap<String, SnapshotState>,
}

// =============================================================================
// Simulated Array
// =============================================================================

/// In-memory storage array
pub struct SimulatedArray {
    backend: String,
    family: BackendFamily,
    capabilities: Mutex<ArrayCapabilities>,
    state: RwLock<ArrayState>,
    /// Lookups a new clone needs before its copy completes
    clone_copy_polls: u32,
    calls: Mutex<Vec<ArrayOperation>>,
    failing: Mutex<HashSet<ArrayOperation>>,
}

impl SimulatedArray {
    /// Create an array seeded with `capabilities`
    pub fn new(
        backend: impl Into<String>,
        family: BackendFamily,
        capabilities: ArrayCapabilities,
    ) -> Self {
        Self {
            backend: backend.into(),
            family,
            capabilities: Mutex::new(capabilities),
            state: RwLock::new(ArrayState::default()),
            clone_copy_polls: 0,
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make volumes created from snapshots report `Copying` for `polls` lookups
    pub fn with_clone_copy_polls(mut self, polls: u32) -> Self {
        self.clone_copy_polls = polls;
        self
    }

    pub fn family(&self) -> BackendFamily {
        self.family
    }

    /// Make every subsequent call of `operation` fail
    pub fn fail_on(&self, operation: ArrayOperation) {
        self.failing.lock().insert(operation);
    }

    /// Stop injecting failures
    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    /// Replace what the next capability refresh reports
    pub fn set_capabilities(&self, capabilities: ArrayCapabilities) {
        *self.capabilities.lock() = capabilities;
    }

    /// Add a ready volume directly, bypassing call recording
    pub async fn seed_volume(&self, name: &str, capacity_bytes: u64, pool_id: &str) {
        let volume = Volume {
            name: name.to_string(),
            capacity_bytes,
            pool_id: pool_id.to_string(),
            status: VolumeStatus::Ready,
        };
        self.state.write().await.volumes.insert(
            name.to_string(),
            VolumeState {
                volume,
                copy_polls_left: 0,
                clone_speed: None,
            },
        );
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<ArrayOperation> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, operation: ArrayOperation) -> usize {
        self.calls.lock().iter().filter(|op| **op == operation).count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    pub async fn volume_names(&self) -> Vec<String> {
        self.state.read().await.volumes.keys().cloned().collect()
    }

    pub async fn snapshot_names(&self) -> Vec<String> {
        self.state.read().await.snapshots.keys().cloned().collect()
    }

    /// Copy speed a clone was created with
    pub async fn clone_speed_of(&self, name: &str) -> Option<u8> {
        self.state
            .read()
            .await
            .volumes
            .get(name)
            .and_then(|state| state.clone_speed)
    }

    /// Record the call and fail it if requested
    fn enter(&self, operation: ArrayOperation) -> Result<()> {
        self.calls.lock().push(operation);
        if self.failing.lock().contains(&operation) {
            return Err(Error::BackendUnreachable {
                backend: self.backend.clone(),
                reason: format!("{:?} rejected by array", operation),
            });
        }
        Ok(())
    }

    fn op_failed(&self, operation: &str, reason: impl std::fmt::Display) -> Error {
        Error::backend_op(self.backend.clone(), operation, reason)
    }
}

#[async_trait]
impl ArrayClient for SimulatedArray {
    async fn get_pool_by_name(&self, name: &str) -> Result<Option<Pool>> {
        self.enter(ArrayOperation::GetPoolByName)?;
        Ok(self
            .capabilities
            .lock()
            .pools
            .iter()
            .find(|pool| pool.name == name)
            .cloned())
    }

    async fn get_volume_by_name(&self, name: &str) -> Result<Option<Volume>> {
        self.enter(ArrayOperation::GetVolumeByName)?;

        let mut state = self.state.write().await;
        let Some(entry) = state.volumes.get_mut(name) else {
            return Ok(None);
        };

        if entry.volume.status == VolumeStatus::Copying {
            entry.copy_polls_left = entry.copy_polls_left.saturating_sub(1);
            if entry.copy_polls_left == 0 {
                entry.volume.status = VolumeStatus::Ready;
                debug!("Clone copy for {} finished", name);
            }
        }

        Ok(Some(entry.volume.clone()))
    }

    async fn create_volume(&self, params: &CreateVolumeParams) -> Result<()> {
        self.enter(ArrayOperation::CreateVolume)?;

        let pool_known = self
            .capabilities
            .lock()
            .pools
            .iter()
            .any(|pool| pool.id == params.pool_id);
        if !pool_known {
            return Err(self.op_failed(
                "create_volume",
                format!("pool {} does not exist", params.pool_id),
            ));
        }

        let mut state = self.state.write().await;
        if state.volumes.contains_key(&params.name) {
            return Err(self.op_failed(
                "create_volume",
                format!("volume {} already exists", params.name),
            ));
        }

        info!(
            "Creating volume {} on {} ({} bytes, pool {}, alloc type {})",
            params.name,
            self.backend,
            params.capacity_bytes,
            params.pool_id,
            params.alloc_type.code()
        );

        state.volumes.insert(
            params.name.clone(),
            VolumeState {
                volume: Volume {
                    name: params.name.clone(),
                    capacity_bytes: params.capacity_bytes,
                    pool_id: params.pool_id.clone(),
                    status: VolumeStatus::Ready,
                },
                copy_polls_left: 0,
                clone_speed: None,
            },
        );

        Ok(())
    }

    async fn create_volume_from_snapshot(
        &self,
        name: &str,
        capacity_bytes: u64,
        snapshot_name: &str,
        clone_speed: u8,
    ) -> Result<()> {
        self.enter(ArrayOperation::CreateVolumeFromSnapshot)?;

        let mut state = self.state.write().await;
        let snapshot = state.snapshots.get(snapshot_name).cloned().ok_or_else(|| {
            self.op_failed(
                "create_volume_from_snapshot",
                format!("snapshot {} does not exist", snapshot_name),
            )
        })?;

        if state.volumes.contains_key(name) {
            return Err(self.op_failed(
                "create_volume_from_snapshot",
                format!("volume {} already exists", name),
            ));
        }
        if capacity_bytes < snapshot.capacity_bytes {
            return Err(self.op_failed(
                "create_volume_from_snapshot",
                "capacity smaller than snapshot",
            ));
        }

        info!(
            "Creating volume {} on {} from snapshot {} of {} (speed {})",
            name, self.backend, snapshot_name, snapshot.source_volume, clone_speed
        );

        let status = if self.clone_copy_polls > 0 {
            VolumeStatus::Copying
        } else {
            VolumeStatus::Ready
        };

        state.volumes.insert(
            name.to_string(),
            VolumeState {
                volume: Volume {
                    name: name.to_string(),
                    capacity_bytes,
                    pool_id: snapshot.pool_id,
                    status,
                },
                copy_polls_left: self.clone_copy_polls,
                clone_speed: Some(clone_speed),
            },
        );

        Ok(())
    }

    async fn create_snapshot(&self, name: &str, source_volume_name: &str) -> Result<()> {
        self.enter(ArrayOperation::CreateSnapshot)?;

        let mut state = self.state.write().await;
        let source = state
            .volumes
            .get(source_volume_name)
            .map(|entry| entry.volume.clone())
            .ok_or_else(|| {
                self.op_failed(
                    "create_snapshot",
                    format!("volume {} does not exist", source_volume_name),
                )
            })?;

        if state.snapshots.contains_key(name) {
            return Err(self.op_failed(
                "create_snapshot",
                format!("snapshot {} already exists", name),
            ));
        }

        debug!("Creating snapshot {} of {}", name, source_volume_name);
        state.snapshots.insert(
            name.to_string(),
            SnapshotState {
                source_volume: source.name,
                capacity_bytes: source.capacity_bytes,
                pool_id: source.pool_id,
            },
        );

        Ok(())
    }

    async fn delete_snapshot(&self, name: &str) -> Result<()> {
        self.enter(ArrayOperation::DeleteSnapshot)?;

        if self.state.write().await.snapshots.remove(name).is_none() {
            return Err(self.op_failed(
                "delete_snapshot",
                format!("snapshot {} does not exist", name),
            ));
        }
        debug!("Deleted snapshot {}", name);
        Ok(())
    }

    async fn delete_volume(&self, name: &str) -> Result<()> {
        self.enter(ArrayOperation::DeleteVolume)?;

        info!("Deleting volume {} on {}", name, self.backend);
        if self.state.write().await.volumes.remove(name).is_none() {
            return Err(Error::VolumeNotFound {
                volume: name.to_string(),
            });
        }
        Ok(())
    }

    async fn get_capabilities(&self) -> Result<ArrayCapabilities> {
        self.enter(ArrayOperation::GetCapabilities)?;
        Ok(self.capabilities.lock().clone())
    }
}
