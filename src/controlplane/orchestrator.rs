//! Main Orchestrator - The "Brain"
//!
//! Surface handed to the RPC layer:
//! - Volume provisioning and deletion by composite handle
//! - Startup capability refresh
//! - Periodic capability refresh, owned by the controller role

use crate::config::WorkflowConfig;
use crate::controlplane::workflows::{VolumeParameter, VolumeRequest, VolumeWorkflows};
use crate::error::{Error, Result};
use crate::metrics::ControllerMetrics;
use crate::registry::{Backend, BackendRegistry, RefreshReport, RefreshRole};
use crate::utils::naming::{compose_handle, split_composite_id, HANDLE_SEPARATOR};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Refresh period used when none, or a zero period, is configured
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Workflow tunables
    pub workflow: WorkflowConfig,
    /// Period of the background capability refresh
    pub refresh_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workflow: WorkflowConfig::default(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// A provisioned volume as returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedVolume {
    /// `<backend>.<volume name>`
    pub handle: String,
    pub backend: String,
    /// Name as stored on the array
    pub name: String,
    pub capacity_bytes: u64,
    pub pool_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_path: Option<String>,
}

/// Per-backend summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSummary {
    pub name: String,
    pub family: String,
    pub pools: Vec<String>,
    pub total_capacity_bytes: u64,
    pub product_version: String,
    pub supports_clone_pair: bool,
    pub refreshed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&Backend> for BackendSummary {
    fn from(backend: &Backend) -> Self {
        Self {
            name: backend.name.clone(),
            family: backend.family.to_string(),
            pools: backend.pools.iter().map(|pool| pool.name.clone()).collect(),
            total_capacity_bytes: backend.total_capacity_bytes(),
            product_version: backend.product_version.clone(),
            supports_clone_pair: backend.supports_clone_pair(),
            refreshed_at: backend.refreshed_at,
        }
    }
}

/// Orchestrator status summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    /// Every backend has been refreshed at least once
    pub synced: bool,
    pub backend_count: usize,
    pub pool_count: usize,
    pub refreshes: u64,
    pub refresh_failures: u64,
    pub backends: Vec<BackendSummary>,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Main orchestrator that coordinates all control plane operations
pub struct Orchestrator {
    config: OrchestratorConfig,
    /// Backend registry
    registry: Arc<BackendRegistry>,
    metrics: ControllerMetrics,
}

impl Orchestrator {
    /// Create a new orchestrator
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<BackendRegistry>,
        metrics: ControllerMetrics,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            metrics,
        })
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &ControllerMetrics {
        &self.metrics
    }

    /// Provision a volume and return its handle
    pub async fn provision_volume(&self, request: VolumeRequest) -> Result<ProvisionedVolume> {
        info!(
            "Provisioning volume: {} ({} bytes)",
            request.name, request.capacity_bytes
        );

        let backend = self.select_backend(&request)?;
        let started = Instant::now();

        let workflows = VolumeWorkflows::new(backend.clone(), self.config.workflow.clone());
        let result = workflows.create(&request).await;

        self.metrics.record_provision(
            &backend.name,
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );

        let created = result.map_err(|e| {
            error!("Provisioning {} on {} failed: {}", request.name, backend.name, e);
            e
        })?;

        let handle = compose_handle(&created.backend, &created.name, HANDLE_SEPARATOR);
        info!("Provisioned volume: {} -> {}", request.name, handle);

        Ok(ProvisionedVolume {
            handle,
            backend: created.backend,
            name: created.name,
            capacity_bytes: created.capacity_bytes,
            pool_name: created.pool_name,
            share_path: created.share_path,
        })
    }

    /// Delete a volume by handle; an unknown volume is not an error
    pub async fn delete_volume(&self, handle: &str) -> Result<()> {
        info!("Deleting volume: {}", handle);

        let (backend_name, volume) = split_composite_id(handle, HANDLE_SEPARATOR);
        if backend_name.is_empty() || volume.is_empty() {
            return Err(Error::InvalidHandle(handle.to_string()));
        }

        let backend = self
            .registry
            .lookup(backend_name)
            .ok_or_else(|| Error::BackendNotFound {
                backend: backend_name.to_string(),
            })?;

        let workflows = VolumeWorkflows::new(backend, self.config.workflow.clone());
        let result = workflows.delete(volume).await;
        self.metrics.record_delete(backend_name, result.is_ok());

        result
    }

    /// Blocking refresh of every backend; any failure is returned
    pub async fn refresh_capabilities_now(&self) -> Result<()> {
        let result = self.registry.sync_refresh().await;
        self.update_inventory();

        match &result {
            Ok(()) => {
                for name in self.registry.backend_names() {
                    self.metrics.record_refresh(&name, true);
                }
                info!("Capabilities refreshed for {} backends", self.registry.len());
            }
            Err(Error::BackendUnreachable { backend, .. }) => {
                self.metrics.record_refresh(backend, false);
            }
            Err(_) => {}
        }

        result
    }

    /// One best-effort refresh pass
    pub async fn refresh_once(&self, role: &RefreshRole) -> RefreshReport {
        let report = self.registry.async_refresh(role).await;

        for name in &report.refreshed {
            self.metrics.record_refresh(name, true);
        }
        for (name, _) in &report.failed {
            self.metrics.record_refresh(name, false);
        }
        if !report.skipped {
            self.update_inventory();
        }

        report
    }

    /// Refresh capabilities on a timer until `shutdown` is cancelled.
    ///
    /// The first pass runs one interval after the call; startup is covered
    /// by [`refresh_capabilities_now`](Self::refresh_capabilities_now).
    pub fn start_periodic_refresh(
        self: &Arc<Self>,
        role: RefreshRole,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let period = if self.config.refresh_interval.is_zero() {
            warn!(
                "Refresh interval must be non-zero, using {:?}",
                DEFAULT_REFRESH_INTERVAL
            );
            DEFAULT_REFRESH_INTERVAL
        } else {
            self.config.refresh_interval
        };

        info!("Starting periodic capability refresh every {:?}", period);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Periodic capability refresh stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = orchestrator.refresh_once(&role).await;
                        if !report.is_clean() {
                            warn!(
                                "Capability refresh finished with {} failed backends",
                                report.failed.len()
                            );
                        } else {
                            debug!("Capability refresh pass finished: {:?}", report);
                        }
                    }
                }
            }
        })
    }

    /// Pick the backend for a request
    pub fn select_backend(&self, request: &VolumeRequest) -> Result<Arc<Backend>> {
        let params = &request.parameters;

        if let Some(name) = params.get(VolumeParameter::Backend) {
            return self
                .registry
                .lookup(name)
                .ok_or_else(|| Error::BackendNotFound {
                    backend: name.to_string(),
                });
        }

        let pool = params.get(VolumeParameter::StoragePool).ok_or(Error::MissingPool)?;
        self.registry
            .find_backend_with_pool(pool)
            .ok_or_else(|| Error::PoolNotFound {
                backend: "*".to_string(),
                pool: pool.to_string(),
            })
    }

    /// Summaries of every backend
    pub fn backends(&self) -> Vec<BackendSummary> {
        self.registry
            .snapshot()
            .iter()
            .map(|backend| BackendSummary::from(backend.as_ref()))
            .collect()
    }

    /// Summary of one backend
    pub fn backend(&self, name: &str) -> Option<BackendSummary> {
        self.registry
            .lookup(name)
            .map(|backend| BackendSummary::from(backend.as_ref()))
    }

    /// Get overall orchestrator status
    pub fn status(&self) -> OrchestratorStatus {
        let stats = self.registry.stats();

        OrchestratorStatus {
            synced: self.registry.is_synced(),
            backend_count: stats.backend_count,
            pool_count: stats.pool_count,
            refreshes: stats.refreshes,
            refresh_failures: stats.refresh_failures,
            backends: self.backends(),
        }
    }

    fn update_inventory(&self) {
        let stats = self.registry.stats();
        self.metrics.set_inventory(stats.backend_count, stats.pool_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::{ArrayOperation, SimulatedArray};
    use crate::domain::ports::{ArrayCapabilities, BackendFamily, Pool};
    use assert_matches::assert_matches;

    const GIB: u64 = 1 << 30;

    fn array(name: &str, family: BackendFamily, pools: &[&str]) -> Arc<SimulatedArray> {
        let pools = pools
            .iter()
            .enumerate()
            .map(|(index, pool)| Pool {
                id: index.to_string(),
                name: pool.to_string(),
                capacity_bytes: 1 << 40,
            })
            .collect();
        Arc::new(SimulatedArray::new(
            name,
            family,
            ArrayCapabilities {
                pools,
                product_version: "V600R003C00".into(),
                ..Default::default()
            },
        ))
    }

    async fn orchestrator(
        arrays: &[(&Arc<SimulatedArray>, BackendFamily, &str)],
    ) -> Arc<Orchestrator> {
        let registry = BackendRegistry::new();
        for (array, family, name) in arrays {
            registry.register(name, *family, (*array).clone()).unwrap();
        }

        let orchestrator = Orchestrator::new(
            OrchestratorConfig {
                workflow: WorkflowConfig {
                    clone_wait_timeout_secs: 5,
                    clone_wait_interval_ms: 1,
                },
                refresh_interval: Duration::from_millis(20),
            },
            registry,
            ControllerMetrics::new().unwrap(),
        );
        orchestrator.refresh_capabilities_now().await.unwrap();
        orchestrator
    }

    #[tokio::test]
    async fn test_provision_and_delete_by_handle() {
        let san = array("san1", BackendFamily::OceanstorSan, &["pool1"]);
        let orchestrator = orchestrator(&[(&san, BackendFamily::OceanstorSan, "san1")]).await;

        let request = VolumeRequest::new("pvc-0123456789abcdef0123", GIB)
            .with(VolumeParameter::StoragePool, "pool1");
        let volume = orchestrator.provision_volume(request).await.unwrap();

        assert_eq!(volume.handle, "san1.pvc-0123456789abcdef01");
        assert_eq!(volume.backend, "san1");
        assert!(volume.share_path.is_none());
        assert_eq!(orchestrator.metrics().provision_count("san1", true), 1);

        orchestrator.delete_volume(&volume.handle).await.unwrap();
        assert!(san.volume_names().await.is_empty());

        // Already gone
        orchestrator.delete_volume(&volume.handle).await.unwrap();
        assert_eq!(san.call_count(ArrayOperation::DeleteVolume), 1);
    }

    #[tokio::test]
    async fn test_backend_selection() {
        let first = array("a-array", BackendFamily::OceanstorSan, &["shared"]);
        let second = array("b-array", BackendFamily::FusionstorageSan, &["shared", "fast"]);
        let orchestrator = orchestrator(&[
            (&first, BackendFamily::OceanstorSan, "a-array"),
            (&second, BackendFamily::FusionstorageSan, "b-array"),
        ])
        .await;

        let by_pool = VolumeRequest::new("pvc-1", GIB).with(VolumeParameter::StoragePool, "fast");
        assert_eq!(orchestrator.select_backend(&by_pool).unwrap().name, "b-array");

        let shared = VolumeRequest::new("pvc-1", GIB).with(VolumeParameter::StoragePool, "shared");
        assert_eq!(orchestrator.select_backend(&shared).unwrap().name, "a-array");

        let named = shared.clone().with(VolumeParameter::Backend, "b-array");
        assert_eq!(orchestrator.select_backend(&named).unwrap().name, "b-array");

        let unknown = shared.with(VolumeParameter::Backend, "c-array");
        assert_matches!(
            orchestrator.provision_volume(unknown).await,
            Err(Error::BackendNotFound { backend }) if backend == "c-array"
        );

        let nowhere = VolumeRequest::new("pvc-1", GIB).with(VolumeParameter::StoragePool, "slow");
        assert_matches!(
            orchestrator.select_backend(&nowhere),
            Err(Error::PoolNotFound { .. })
        );
        assert_matches!(
            orchestrator.select_backend(&VolumeRequest::new("pvc-1", GIB)),
            Err(Error::MissingPool)
        );
    }

    #[tokio::test]
    async fn test_invalid_handles() {
        let san = array("san1", BackendFamily::OceanstorSan, &["pool1"]);
        let orchestrator = orchestrator(&[(&san, BackendFamily::OceanstorSan, "san1")]).await;

        assert_matches!(
            orchestrator.delete_volume("no-separator").await,
            Err(Error::InvalidHandle(_))
        );
        assert_matches!(
            orchestrator.delete_volume("san1.").await,
            Err(Error::InvalidHandle(_))
        );
        assert_matches!(
            orchestrator.delete_volume("san9.pvc-1").await,
            Err(Error::BackendNotFound { .. })
        );
        assert!(san.calls().iter().all(|op| *op == ArrayOperation::GetCapabilities));
    }

    #[tokio::test]
    async fn test_nas_provision_carries_share_path() {
        let nas = array("nas1", BackendFamily::OceanstorNas, &["fs-pool"]);
        let orchestrator = orchestrator(&[(&nas, BackendFamily::OceanstorNas, "nas1")]).await;

        let request = VolumeRequest::new("pvc-share-1", GIB)
            .with(VolumeParameter::StoragePool, "fs-pool");
        let volume = orchestrator.provision_volume(request).await.unwrap();

        assert_eq!(volume.handle, "nas1.pvc_share_1");
        assert_eq!(volume.share_path.as_deref(), Some("/pvc_share_1/"));
    }

    #[tokio::test]
    async fn test_startup_refresh_failure_is_returned() {
        let san = array("san1", BackendFamily::OceanstorSan, &["pool1"]);
        san.fail_on(ArrayOperation::GetCapabilities);

        let registry = BackendRegistry::new();
        registry
            .register("san1", BackendFamily::OceanstorSan, san.clone())
            .unwrap();
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            registry,
            ControllerMetrics::new().unwrap(),
        );

        assert_matches!(
            orchestrator.refresh_capabilities_now().await,
            Err(Error::BackendUnreachable { .. })
        );
        assert!(!orchestrator.status().synced);
        assert_eq!(orchestrator.metrics().refresh_count("san1", false), 1);
    }

    #[tokio::test]
    async fn test_periodic_refresh_stops_on_shutdown() {
        let san = array("san1", BackendFamily::OceanstorSan, &["pool1"]);
        let orchestrator = orchestrator(&[(&san, BackendFamily::OceanstorSan, "san1")]).await;
        san.reset_calls();
        san.set_capabilities(ArrayCapabilities {
            pools: vec![Pool {
                id: "5".into(),
                name: "pool2".into(),
                capacity_bytes: 1,
            }],
            ..Default::default()
        });

        let shutdown = CancellationToken::new();
        let handle = orchestrator.start_periodic_refresh(RefreshRole::Controller, shutdown.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let refreshed = san.call_count(ArrayOperation::GetCapabilities);
        assert!(refreshed >= 1);
        assert!(orchestrator.backend("san1").unwrap().pools.contains(&"pool2".to_string()));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(san.call_count(ArrayOperation::GetCapabilities), refreshed);
    }

    #[tokio::test]
    async fn test_zero_refresh_interval_falls_back_to_default() {
        let san = array("san1", BackendFamily::OceanstorSan, &["pool1"]);
        let registry = BackendRegistry::new();
        registry
            .register("san1", BackendFamily::OceanstorSan, san.clone())
            .unwrap();
        let orchestrator = Orchestrator::new(
            OrchestratorConfig {
                refresh_interval: Duration::ZERO,
                ..Default::default()
            },
            registry,
            ControllerMetrics::new().unwrap(),
        );

        let shutdown = CancellationToken::new();
        let handle = orchestrator.start_periodic_refresh(RefreshRole::Controller, shutdown.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        shutdown.cancel();
        handle.await.unwrap();

        // The first pass is a full default period away
        assert_eq!(san.call_count(ArrayOperation::GetCapabilities), 0);
    }

    #[tokio::test]
    async fn test_status() {
        let san = array("san1", BackendFamily::OceanstorSan, &["pool1", "pool2"]);
        let orchestrator = orchestrator(&[(&san, BackendFamily::OceanstorSan, "san1")]).await;

        let status = orchestrator.status();
        assert!(status.synced);
        assert_eq!(status.backend_count, 1);
        assert_eq!(status.pool_count, 2);
        assert!(status.backends[0].supports_clone_pair);
        assert_eq!(status.backends[0].family, "oceanstor-san");
    }
}
