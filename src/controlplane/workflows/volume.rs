//! Volume Workflows
//!
//! Create (plain or cloned) and delete for one backend. Create runs as a
//! [`StepFlow`]; a clone goes through a transient snapshot that is removed on
//! every exit path.

use super::precondition::{self, CloneSource, ResolvedVolume};
use super::request::VolumeRequest;
use crate::config::WorkflowConfig;
use crate::domain::ports::{ArrayClientRef, VolumeStatus};
use crate::error::{Error, Result};
use crate::flow::{FlowContext, StepFlow, StepOutput};
use crate::registry::Backend;
use crate::utils::wait_until;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Name of the single step of the create flow
pub const CREATE_VOLUME_STEP: &str = "create-volume";

/// Upper bound (exclusive) of the random snapshot name suffix
const SNAPSHOT_SUFFIX_RANGE: u64 = 10_000_000_000;

/// Context key set when the target volume was already present
const EXISTED_KEY: &str = "existed";

/// Result of a successful create
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedVolume {
    pub backend: String,
    /// Name as stored on the array
    pub name: String,
    pub capacity_bytes: u64,
    pub pool_name: String,
    /// Share path for file families
    pub share_path: Option<String>,
    /// The volume already existed and nothing was created
    pub existed: bool,
}

/// Volume workflows bound to one backend snapshot
pub struct VolumeWorkflows {
    backend: Arc<Backend>,
    config: WorkflowConfig,
}

impl VolumeWorkflows {
    pub fn new(backend: Arc<Backend>, config: WorkflowConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Create a volume, idempotently.
    ///
    /// Fails before any array call when the request does not resolve.
    pub async fn create(&self, request: &VolumeRequest) -> Result<CreatedVolume> {
        let resolved = Arc::new(precondition::resolve(&self.backend, request)?);

        let mut flow = self.create_flow(&resolved);
        if let Err(e) = flow.run(resolved.clone()).await {
            let failures = flow.revert().await;
            if !failures.is_empty() {
                error!(
                    "Revert of {} left {} compensations failed",
                    flow.label(),
                    failures.len()
                );
            }
            return Err(e);
        }

        let existed = flow
            .context()
            .get(EXISTED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(CreatedVolume {
            backend: self.backend.name.clone(),
            name: resolved.name.clone(),
            capacity_bytes: resolved.capacity_bytes,
            pool_name: resolved.pool_name.clone(),
            share_path: self.backend.family.share_path(&resolved.name),
            existed,
        })
    }

    /// Delete a volume by its array name, idempotently
    pub async fn delete(&self, name: &str) -> Result<()> {
        let client = &self.backend.client;

        if client.get_volume_by_name(name).await?.is_none() {
            warn!(
                "Volume {} doesn't exist on {} while trying to delete it",
                name, self.backend.name
            );
            return Ok(());
        }

        client.delete_volume(name).await?;
        info!("Deleted volume {} on {}", name, self.backend.name);
        Ok(())
    }

    fn create_flow(&self, resolved: &ResolvedVolume) -> StepFlow<ResolvedVolume> {
        let mut flow = StepFlow::new(format!("create-volume-{}", resolved.name));
        let client = self.backend.client.clone();
        let backend = self.backend.name.clone();
        let config = self.config.clone();

        flow.add_step(
            CREATE_VOLUME_STEP,
            move |volume: Arc<ResolvedVolume>, _context: FlowContext| {
                let client = client.clone();
                let backend = backend.clone();
                let config = config.clone();
                async move { create_volume(&client, &backend, &volume, &config).await }
            },
        );

        flow
    }
}

// =============================================================================
// Steps
// =============================================================================

async fn create_volume(
    client: &ArrayClientRef,
    backend: &str,
    volume: &ResolvedVolume,
    config: &WorkflowConfig,
) -> Result<StepOutput> {
    let mut output = StepOutput::new();

    if let Some(existing) = client.get_volume_by_name(&volume.name).await? {
        info!("Volume {} already exists on {}", volume.name, backend);
        match existing.status {
            VolumeStatus::Ready => {}
            VolumeStatus::Faulty => {
                return Err(faulty(backend, &volume.name));
            }
            VolumeStatus::Copying => {
                info!("Volume {} is still copying, waiting for it", volume.name);
                wait_for_ready(client, backend, &volume.name, config).await?;
            }
        }
        output.insert(EXISTED_KEY.to_string(), json!(true));
        return Ok(output);
    }

    match &volume.clone_from {
        Some(source) => clone_volume(client, backend, volume, source, config).await?,
        None => {
            client.create_volume(&volume.create_params()).await?;
            info!("Created volume {} on {}", volume.name, backend);
        }
    }

    output.insert(EXISTED_KEY.to_string(), json!(false));
    Ok(output)
}

async fn clone_volume(
    client: &ArrayClientRef,
    backend: &str,
    volume: &ResolvedVolume,
    source: &CloneSource,
    config: &WorkflowConfig,
) -> Result<()> {
    let source_volume = client
        .get_volume_by_name(&source.name)
        .await?
        .ok_or_else(|| Error::SourceNotFound {
            volume: source.name.clone(),
        })?;

    if volume.capacity_bytes < source_volume.capacity_bytes {
        return Err(Error::InsufficientCapacity {
            requested: volume.capacity_bytes,
            available: source_volume.capacity_bytes,
        });
    }

    let snapshot = snapshot_name(&source.name);
    client
        .create_snapshot(&snapshot, &source.name)
        .await
        .map_err(|e| Error::SnapshotCreateFailed {
            snapshot: snapshot.clone(),
            reason: e.to_string(),
        })?;
    debug!("Created snapshot {} of {}", snapshot, source.name);

    let result = materialize_clone(client, backend, volume, source, &snapshot, config).await;

    if let Err(e) = client.delete_snapshot(&snapshot).await {
        warn!("Delete snapshot {} on {} error: {}", snapshot, backend, e);
    }

    result
}

async fn materialize_clone(
    client: &ArrayClientRef,
    backend: &str,
    volume: &ResolvedVolume,
    source: &CloneSource,
    snapshot: &str,
    config: &WorkflowConfig,
) -> Result<()> {
    client
        .create_volume_from_snapshot(&volume.name, volume.capacity_bytes, snapshot, source.speed)
        .await?;

    // A clone that never became ready must not be found by a retry
    if let Err(e) = wait_for_ready(client, backend, &volume.name, config).await {
        warn!(
            "Clone {} on {} did not become ready: {}; deleting it",
            volume.name, backend, e
        );
        if let Err(cleanup) = client.delete_volume(&volume.name).await {
            error!(
                "Delete of unfinished clone {} on {} failed: {}",
                volume.name, backend, cleanup
            );
        }
        return Err(e);
    }

    info!(
        "Cloned volume {} on {} from {} (speed {})",
        volume.name, backend, source.name, source.speed
    );
    Ok(())
}

/// Poll `name` until it reports ready; faulty or vanished volumes fail the wait
async fn wait_for_ready(
    client: &ArrayClientRef,
    backend: &str,
    name: &str,
    config: &WorkflowConfig,
) -> Result<()> {
    let client = client.clone();
    let backend = backend.to_string();
    let name = name.to_string();

    wait_until(
        move || {
            let client = client.clone();
            let backend = backend.clone();
            let name = name.clone();
            async move {
                match client.get_volume_by_name(&name).await? {
                    Some(volume) if volume.status == VolumeStatus::Faulty => {
                        Err(faulty(&backend, &name))
                    }
                    Some(volume) => Ok(volume.is_ready()),
                    None => Err(Error::VolumeNotFound { volume: name }),
                }
            }
        },
        config.clone_wait_timeout(),
        config.clone_wait_interval(),
    )
    .await
}

fn faulty(backend: &str, name: &str) -> Error {
    Error::backend_op(backend, "clone", format!("volume {} is faulty", name))
}

fn snapshot_name(source: &str) -> String {
    let suffix = rand::thread_rng().gen_range(0..SNAPSHOT_SUFFIX_RANGE);
    format!("k8s_vol_{}_snap_{}", source, suffix)
}
