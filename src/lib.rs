//! Array Provisioner - Storage Array Control Plane
//!
//! Provisions volumes and NAS filesystems on OceanStor and FusionStorage
//! arrays: plain creates, clones through a temporary snapshot, and
//! idempotent deletes, with a registry that tracks each array's pools and
//! feature flags.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              Orchestrator                                   │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │    REST API     │  │ Volume Workflows│  │   Periodic Refresh          │  │
//! │  │    (axum)       │  │ (StepFlow saga) │  │   (controller role)         │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           │                    │                         │                   │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                                │                                             │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │   Backend Registry    │                                │
//! │                    │ (pools, capabilities) │                                │
//! │                    └───────────┬───────────┘                                │
//! ├────────────────────────────────┼────────────────────────────────────────────┤
//! │                          ArrayClient port                                    │
//! │  ┌─────────────────┐  ┌────────┴────────┐  ┌─────────────────────────────┐  │
//! │  │  OceanStor SAN  │  │  OceanStor NAS  │  │      FusionStorage SAN      │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Orchestrator, volume workflows, REST API and backends
//! - [`registry`]: Backend registry and capability refresh
//! - [`flow`]: Step flow with compensation
//! - [`domain`]: Array types and the [`ArrayClient`] port
//! - [`config`]: Controller configuration
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Name normalization and bounded waits
//! - [`error`]: Error types and handling

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod flow;
pub mod metrics;
pub mod registry;
pub mod utils;

// Re-export commonly used types
pub use controlplane::{
    Orchestrator, OrchestratorConfig, OrchestratorStatus, ProvisionedVolume, BackendSummary,
    ApiServer, ApiServerConfig,
    BackendFactory, SimulatedArray,
};

pub use controlplane::workflows::{
    CreatedVolume, VolumeParameter, VolumeParameters, VolumeRequest, VolumeWorkflows,
};

pub use config::{BackendConfig, ControllerConfig, PoolSeed, WorkflowConfig};

pub use domain::ports::{
    AllocType, ArrayCapabilities, ArrayClient, ArrayClientRef, BackendFamily,
    CreateVolumeParams, Pool, QosPolicy, SupportLevel, Volume, VolumeStatus,
};

pub use error::{Error, ErrorCategory, Result};

pub use flow::{FlowContext, StepFlow, StepOutput};

pub use metrics::ControllerMetrics;

pub use registry::{
    Backend, BackendRegistry, RefreshReport, RefreshRole, RegistryEvent,
    RegistryStatsSnapshot,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
