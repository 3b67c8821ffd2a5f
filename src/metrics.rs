//! Controller Metrics
//!
//! Prometheus counters for provisioning, deletion and capability refresh,
//! kept in a dedicated registry and exposed by the metrics server.

use crate::error::{Error, Result};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

const OUTCOME_SUCCESS: &str = "success";
const OUTCOME_ERROR: &str = "error";

/// Metrics exported by the controller
#[derive(Clone)]
pub struct ControllerMetrics {
    registry: Registry,
    provisions: IntCounterVec,
    deletes: IntCounterVec,
    refreshes: IntCounterVec,
    provision_duration: Histogram,
    backends: IntGauge,
    pools: IntGauge,
}

impl ControllerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let provisions = IntCounterVec::new(
            Opts::new(
                "array_provisioner_provisions_total",
                "Volume create requests by backend and outcome",
            ),
            &["backend", "outcome"],
        )
        .map_err(metrics_error)?;

        let deletes = IntCounterVec::new(
            Opts::new(
                "array_provisioner_deletes_total",
                "Volume delete requests by backend and outcome",
            ),
            &["backend", "outcome"],
        )
        .map_err(metrics_error)?;

        let refreshes = IntCounterVec::new(
            Opts::new(
                "array_provisioner_capability_refreshes_total",
                "Backend capability refreshes by backend and outcome",
            ),
            &["backend", "outcome"],
        )
        .map_err(metrics_error)?;

        let provision_duration = Histogram::with_opts(HistogramOpts::new(
            "array_provisioner_provision_duration_seconds",
            "Duration of volume create requests",
        ))
        .map_err(metrics_error)?;

        let backends = IntGauge::new(
            "array_provisioner_backends",
            "Number of registered backends",
        )
        .map_err(metrics_error)?;

        let pools = IntGauge::new(
            "array_provisioner_pools",
            "Number of pools reported by all backends",
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(provisions.clone())).map_err(metrics_error)?;
        registry.register(Box::new(deletes.clone())).map_err(metrics_error)?;
        registry.register(Box::new(refreshes.clone())).map_err(metrics_error)?;
        registry
            .register(Box::new(provision_duration.clone()))
            .map_err(metrics_error)?;
        registry.register(Box::new(backends.clone())).map_err(metrics_error)?;
        registry.register(Box::new(pools.clone())).map_err(metrics_error)?;

        Ok(Self {
            registry,
            provisions,
            deletes,
            refreshes,
            provision_duration,
            backends,
            pools,
        })
    }

    pub fn record_provision(&self, backend: &str, success: bool, elapsed_secs: f64) {
        self.provisions
            .with_label_values(&[backend, outcome(success)])
            .inc();
        self.provision_duration.observe(elapsed_secs);
    }

    pub fn record_delete(&self, backend: &str, success: bool) {
        self.deletes.with_label_values(&[backend, outcome(success)]).inc();
    }

    pub fn record_refresh(&self, backend: &str, success: bool) {
        self.refreshes.with_label_values(&[backend, outcome(success)]).inc();
    }

    pub fn set_inventory(&self, backends: usize, pools: usize) {
        self.backends.set(backends as i64);
        self.pools.set(pools as i64);
    }

    pub fn provision_count(&self, backend: &str, success: bool) -> u64 {
        self.provisions
            .with_label_values(&[backend, outcome(success)])
            .get()
    }

    pub fn refresh_count(&self, backend: &str, success: bool) -> u64 {
        self.refreshes
            .with_label_values(&[backend, outcome(success)])
            .get()
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("Metrics encoding: {}", e)))
    }

    /// Content type of [`encode`](Self::encode) output
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}

fn outcome(success: bool) -> &'static str {
    if success {
        OUTCOME_SUCCESS
    } else {
        OUTCOME_ERROR
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("Metrics error: {}", e))
}
