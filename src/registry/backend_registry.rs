//! Backend Registry
//!
//! Tracks every configured storage array and the capabilities it last
//! reported. Readers take an `Arc<Backend>` snapshot and never block each
//! other; a refresh swaps whole entries under a short write lock.

use super::RegistryEvent;
use crate::config::BackendConfig;
use crate::controlplane::backends::BackendFactory;
use crate::domain::ports::{ArrayCapabilities, ArrayClientRef, BackendFamily, Pool, SupportLevel};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

// =============================================================================
// Constants
// =============================================================================

/// First product version that supports clone pairs
pub const CLONE_PAIR_MIN_VERSION: &str = "V600R003C00";

/// Capacity of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Backend
// =============================================================================

/// One storage array as last seen by the registry
#[derive(Clone)]
pub struct Backend {
    /// Unique backend name
    pub name: String,
    /// Array family
    pub family: BackendFamily,
    /// Client for array calls
    pub client: ArrayClientRef,
    /// Pools, replaced wholesale on each refresh
    pub pools: Vec<Pool>,
    /// Feature name to support level
    pub capabilities: BTreeMap<String, SupportLevel>,
    pub product_version: String,
    /// Last successful refresh, `None` until the first one
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("family", &self.family)
            .field("pools", &self.pools.len())
            .field("capabilities", &self.capabilities.len())
            .field("product_version", &self.product_version)
            .field("refreshed_at", &self.refreshed_at)
            .finish()
    }
}

impl Backend {
    /// Create an entry that has not been refreshed yet
    pub fn new(name: impl Into<String>, family: BackendFamily, client: ArrayClientRef) -> Self {
        Self {
            name: name.into(),
            family,
            client,
            pools: Vec::new(),
            capabilities: BTreeMap::new(),
            product_version: String::new(),
            refreshed_at: None,
        }
    }

    /// Copy of this entry carrying freshly fetched capabilities
    fn refreshed(&self, capabilities: ArrayCapabilities) -> Self {
        Self {
            name: self.name.clone(),
            family: self.family,
            client: self.client.clone(),
            pools: capabilities.pools,
            capabilities: capabilities.features,
            product_version: capabilities.product_version,
            refreshed_at: Some(Utc::now()),
        }
    }

    pub fn pool_by_name(&self, name: &str) -> Option<&Pool> {
        self.pools.iter().find(|pool| pool.name == name)
    }

    /// Levels 1 and 2 count as supported; unknown features do not
    pub fn supports_feature(&self, feature: &str) -> bool {
        self.capabilities
            .get(feature)
            .map(SupportLevel::is_supported)
            .unwrap_or(false)
    }

    pub fn supports_clone_pair(&self) -> bool {
        !self.product_version.is_empty()
            && self.product_version.as_str() >= CLONE_PAIR_MIN_VERSION
    }

    pub fn total_capacity_bytes(&self) -> u64 {
        self.pools.iter().map(|pool| pool.capacity_bytes).sum()
    }
}

// =============================================================================
// Refresh Role
// =============================================================================

/// Whether this process refreshes backend state in the background
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshRole {
    /// Always refresh
    Controller,
    /// Refresh only while the flag file exists; re-checked on every pass
    FlagFile(PathBuf),
    /// Never refresh in the background
    Disabled,
}

impl RefreshRole {
    /// Derive the role from command line flags
    pub fn from_flags(controller: bool, flag_file: Option<PathBuf>) -> Self {
        match (controller, flag_file) {
            (true, _) => RefreshRole::Controller,
            (false, Some(path)) => RefreshRole::FlagFile(path),
            (false, None) => RefreshRole::Disabled,
        }
    }

    pub fn owns_refresh(&self) -> bool {
        match self {
            RefreshRole::Controller => true,
            RefreshRole::FlagFile(path) => path.exists(),
            RefreshRole::Disabled => false,
        }
    }
}

/// Outcome of one best-effort refresh pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    /// Backends whose refresh failed, with the reason
    pub failed: Vec<(String, String)>,
    /// The role did not own refresh, nothing was attempted
    pub skipped: bool,
}

impl RefreshReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry counters
#[derive(Debug, Default)]
pub struct RegistryStats {
    pub registrations: AtomicU64,
    pub refreshes: AtomicU64,
    pub refresh_failures: AtomicU64,
}

impl RegistryStats {
    /// Create a snapshot of current stats
    pub fn snapshot(&self, backend_count: usize, pool_count: usize) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            backend_count,
            pool_count,
            registrations: self.registrations.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of registry statistics
#[derive(Debug, Clone)]
pub struct RegistryStatsSnapshot {
    pub backend_count: usize,
    pub pool_count: usize,
    pub registrations: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
}

// =============================================================================
// Backend Registry
// =============================================================================

/// Registry of configured backends
pub struct BackendRegistry {
    /// Backends keyed by name
    backends: RwLock<BTreeMap<String, Arc<Backend>>>,
    /// Serializes refresh passes
    refresh_lock: Mutex<()>,
    /// Counters
    stats: RegistryStats,
    /// Event broadcaster
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new() -> Arc<Self> {
        let (event_sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Arc::new(Self {
            backends: RwLock::new(BTreeMap::new()),
            refresh_lock: Mutex::new(()),
            stats: RegistryStats::default(),
            event_sender,
        })
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Register every configured backend.
    ///
    /// All entries are validated before any is registered.
    pub fn register_backends(&self, configs: &[BackendConfig]) -> Result<()> {
        if configs.is_empty() {
            return Err(Error::Configuration(
                "At least one backend must be configured".into(),
            ));
        }

        let mut seen = BTreeSet::new();
        for config in configs {
            config.validate()?;
            if !seen.insert(config.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "Duplicate backend name: {}",
                    config.name
                )));
            }
        }

        for config in configs {
            let client = BackendFactory::create(config)?;
            self.register(&config.name, config.storage, client)?;
        }

        info!("Registered {} backends", configs.len());
        Ok(())
    }

    /// Register a single backend with an existing client
    pub fn register(
        &self,
        name: &str,
        family: BackendFamily,
        client: ArrayClientRef,
    ) -> Result<()> {
        {
            let mut backends = self.backends.write();
            if backends.contains_key(name) {
                return Err(Error::Configuration(format!(
                    "Duplicate backend name: {}",
                    name
                )));
            }
            backends.insert(name.to_string(), Arc::new(Backend::new(name, family, client)));
        }

        self.stats.registrations.fetch_add(1, Ordering::Relaxed);
        debug!("Registered backend {} ({})", name, family);

        let _ = self.event_sender.send(RegistryEvent::BackendRegistered {
            backend: name.to_string(),
            family: family.to_string(),
        });

        Ok(())
    }

    /// Refresh every backend, failing on the first unreachable one.
    ///
    /// Used at startup, where a backend that cannot be reached is fatal.
    pub async fn sync_refresh(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;

        for backend in self.entries() {
            match backend.client.get_capabilities().await {
                Ok(capabilities) => self.replace(&backend, capabilities),
                Err(e) => {
                    self.record_failure(&backend.name, &e);
                    return Err(match e {
                        Error::BackendUnreachable { .. } => e,
                        other => Error::BackendUnreachable {
                            backend: backend.name.clone(),
                            reason: other.to_string(),
                        },
                    });
                }
            }
        }

        Ok(())
    }

    /// Refresh every backend, keeping stale state for those that fail
    pub async fn async_refresh(&self, role: &RefreshRole) -> RefreshReport {
        if !role.owns_refresh() {
            debug!("Skipping backend refresh, role {:?} does not own it", role);
            return RefreshReport {
                skipped: true,
                ..Default::default()
            };
        }

        let _guard = self.refresh_lock.lock().await;
        let mut report = RefreshReport::default();

        for backend in self.entries() {
            match backend.client.get_capabilities().await {
                Ok(capabilities) => {
                    self.replace(&backend, capabilities);
                    report.refreshed.push(backend.name.clone());
                }
                Err(e) => {
                    warn!(
                        "Refresh of backend {} failed, keeping previous state: {}",
                        backend.name, e
                    );
                    self.record_failure(&backend.name, &e);
                    report.failed.push((backend.name.clone(), e.to_string()));
                }
            }
        }

        report
    }

    /// Look up a backend snapshot by name
    pub fn lookup(&self, name: &str) -> Option<Arc<Backend>> {
        self.backends.read().get(name).cloned()
    }

    /// Names of all backends, sorted
    pub fn backend_names(&self) -> Vec<String> {
        self.backends.read().keys().cloned().collect()
    }

    /// Snapshots of all backends, sorted by name
    pub fn snapshot(&self) -> Vec<Arc<Backend>> {
        self.entries()
    }

    /// First backend, by name, that currently reports `pool`
    pub fn find_backend_with_pool(&self, pool: &str) -> Option<Arc<Backend>> {
        self.backends
            .read()
            .values()
            .find(|backend| backend.pool_by_name(pool).is_some())
            .cloned()
    }

    /// Every backend has been refreshed at least once
    pub fn is_synced(&self) -> bool {
        let backends = self.backends.read();
        !backends.is_empty()
            && backends
                .values()
                .all(|backend| backend.refreshed_at.is_some())
    }

    pub fn len(&self) -> usize {
        self.backends.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.read().is_empty()
    }

    /// Get registry statistics
    pub fn stats(&self) -> RegistryStatsSnapshot {
        let backends = self.backends.read();
        let pool_count = backends.values().map(|backend| backend.pools.len()).sum();
        self.stats.snapshot(backends.len(), pool_count)
    }

    fn entries(&self) -> Vec<Arc<Backend>> {
        self.backends.read().values().cloned().collect()
    }

    fn replace(&self, backend: &Backend, capabilities: ArrayCapabilities) {
        let updated = Arc::new(backend.refreshed(capabilities));
        let pool_count = updated.pools.len();

        self.backends
            .write()
            .insert(updated.name.clone(), updated);
        self.stats.refreshes.fetch_add(1, Ordering::Relaxed);

        debug!("Refreshed backend {} ({} pools)", backend.name, pool_count);
        let _ = self.event_sender.send(RegistryEvent::CapabilitiesRefreshed {
            backend: backend.name.clone(),
            pool_count,
        });
    }

    fn record_failure(&self, backend: &str, error: &Error) {
        self.stats.refresh_failures.fetch_add(1, Ordering::Relaxed);
        let _ = self.event_sender.send(RegistryEvent::RefreshFailed {
            backend: backend.to_string(),
            reason: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolSeed;
    use crate::controlplane::backends::{ArrayOperation, SimulatedArray};
    use assert_matches::assert_matches;

    fn pool(id: &str, name: &str) -> Pool {
        Pool {
            id: id.into(),
            name: name.into(),
            capacity_bytes: 1 << 40,
        }
    }

    fn simulated(name: &str, pools: Vec<Pool>) -> Arc<SimulatedArray> {
        Arc::new(SimulatedArray::new(
            name,
            BackendFamily::OceanstorSan,
            ArrayCapabilities {
                pools,
                features: BTreeMap::from([("HyperCopy".to_string(), SupportLevel::Supported)]),
                product_version: "V600R005C00".into(),
            },
        ))
    }

    fn config(name: &str) -> BackendConfig {
        BackendConfig {
            name: name.into(),
            storage: BackendFamily::FusionstorageSan,
            urls: vec!["https://10.0.0.5:28443".into()],
            user: None,
            pools: vec![PoolSeed {
                name: "pool-a".into(),
                capacity_bytes: 100,
            }],
            features: BTreeMap::new(),
            product_version: String::new(),
            clone_copy_polls: 0,
        }
    }

    #[test]
    fn test_register_backends_validation() {
        let registry = BackendRegistry::new();
        assert_matches!(registry.register_backends(&[]), Err(Error::Configuration(_)));

        let result = registry.register_backends(&[config("a"), config("a")]);
        assert_matches!(result, Err(Error::Configuration(msg)) if msg.contains("Duplicate"));
        assert!(registry.is_empty());

        let result = registry.register_backends(&[config("a"), config("b.c")]);
        assert_matches!(result, Err(Error::Configuration(_)));
        assert!(registry.is_empty());

        registry.register_backends(&[config("b"), config("a")]).unwrap();
        assert_eq!(registry.backend_names(), vec!["a", "b"]);
        assert!(!registry.is_synced());
    }

    #[tokio::test]
    async fn test_sync_refresh_populates_pools() {
        let registry = BackendRegistry::new();
        registry.register_backends(&[config("fusion1")]).unwrap();
        registry.sync_refresh().await.unwrap();

        let backend = registry.lookup("fusion1").unwrap();
        assert_eq!(backend.pool_by_name("pool-a").map(|p| p.id.as_str()), Some("0"));
        assert!(backend.refreshed_at.is_some());
        assert!(registry.is_synced());
        assert!(registry.lookup("missing").is_none());
    }

    #[tokio::test]
    async fn test_sync_refresh_propagates_first_failure() {
        let registry = BackendRegistry::new();
        let broken = simulated("array1", vec![pool("0", "pool1")]);
        broken.fail_on(ArrayOperation::GetCapabilities);
        registry
            .register("array1", BackendFamily::OceanstorSan, broken)
            .unwrap();

        assert_matches!(
            registry.sync_refresh().await,
            Err(Error::BackendUnreachable { backend, .. }) if backend == "array1"
        );
        assert_eq!(registry.stats().refresh_failures, 1);
    }

    #[tokio::test]
    async fn test_async_refresh_isolates_failures() {
        let registry = BackendRegistry::new();
        let first = simulated("array1", vec![pool("0", "pool1")]);
        let second = simulated("array2", vec![pool("0", "pool2")]);
        registry
            .register("array1", BackendFamily::OceanstorSan, first.clone())
            .unwrap();
        registry
            .register("array2", BackendFamily::OceanstorSan, second.clone())
            .unwrap();
        registry.sync_refresh().await.unwrap();

        // array1 loses its pool but becomes unreachable; array2 gains one
        first.set_capabilities(ArrayCapabilities::default());
        first.fail_on(ArrayOperation::GetCapabilities);
        second.set_capabilities(ArrayCapabilities {
            pools: vec![pool("0", "pool2"), pool("1", "pool3")],
            ..Default::default()
        });

        let mut events = registry.subscribe();
        let report = registry.async_refresh(&RefreshRole::Controller).await;

        assert_eq!(report.refreshed, vec!["array2"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "array1");
        assert!(!report.is_clean());

        let stale = registry.lookup("array1").unwrap();
        assert!(stale.pool_by_name("pool1").is_some());
        assert!(registry.lookup("array2").unwrap().pool_by_name("pool3").is_some());

        let event = events.recv().await.unwrap();
        assert!(event.is_failure());
        assert_eq!(event.backend(), "array1");
    }

    fn generation(n: u32) -> ArrayCapabilities {
        ArrayCapabilities {
            pools: vec![
                pool("0", &format!("gen{}-a", n)),
                pool("1", &format!("gen{}-b", n)),
            ],
            features: BTreeMap::new(),
            product_version: format!("V{}", n),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lookup_during_refresh_sees_whole_entries() {
        let registry = BackendRegistry::new();
        let array = simulated("array1", vec![]);
        array.set_capabilities(generation(0));
        registry
            .register("array1", BackendFamily::OceanstorSan, array.clone())
            .unwrap();
        registry.sync_refresh().await.unwrap();

        let refresher = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for n in 1..=200 {
                    array.set_capabilities(generation(n));
                    let report = registry.async_refresh(&RefreshRole::Controller).await;
                    assert!(report.is_clean());
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut reads = 0u32;
        while !refresher.is_finished() {
            let backend = registry.lookup("array1").unwrap();
            let n = backend.product_version.trim_start_matches('V');
            let names: Vec<&str> = backend.pools.iter().map(|p| p.name.as_str()).collect();
            assert_eq!(names, vec![format!("gen{}-a", n), format!("gen{}-b", n)]);
            assert!(backend.refreshed_at.is_some());
            reads += 1;
            tokio::task::yield_now().await;
        }
        refresher.await.unwrap();

        assert!(reads > 0);
        assert_eq!(registry.lookup("array1").unwrap().product_version, "V200");
    }

    #[tokio::test]
    async fn test_refresh_role() {
        let registry = BackendRegistry::new();
        let array = simulated("array1", vec![pool("0", "pool1")]);
        registry
            .register("array1", BackendFamily::OceanstorSan, array.clone())
            .unwrap();

        let report = registry.async_refresh(&RefreshRole::Disabled).await;
        assert!(report.skipped);
        assert_eq!(array.call_count(ArrayOperation::GetCapabilities), 0);

        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("controller.flag");
        let role = RefreshRole::from_flags(false, Some(flag.clone()));
        assert!(registry.async_refresh(&role).await.skipped);

        std::fs::write(&flag, b"").unwrap();
        let report = registry.async_refresh(&role).await;
        assert!(!report.skipped);
        assert_eq!(report.refreshed, vec!["array1"]);
        assert_eq!(array.call_count(ArrayOperation::GetCapabilities), 1);

        assert_eq!(RefreshRole::from_flags(true, Some(flag)), RefreshRole::Controller);
    }

    #[tokio::test]
    async fn test_feature_helpers_and_pool_search() {
        let registry = BackendRegistry::new();
        registry
            .register(
                "b-array",
                BackendFamily::OceanstorSan,
                simulated("b-array", vec![pool("0", "shared")]),
            )
            .unwrap();
        registry
            .register(
                "a-array",
                BackendFamily::OceanstorSan,
                simulated("a-array", vec![pool("3", "shared"), pool("4", "only-a")]),
            )
            .unwrap();
        registry.sync_refresh().await.unwrap();

        let found = registry.find_backend_with_pool("shared").unwrap();
        assert_eq!(found.name, "a-array");
        assert!(registry.find_backend_with_pool("nowhere").is_none());

        assert!(found.supports_feature("HyperCopy"));
        assert!(!found.supports_feature("SmartQoS"));
        assert!(found.supports_clone_pair());
        assert_eq!(found.total_capacity_bytes(), 2 << 40);

        let stats = registry.stats();
        assert_eq!(stats.backend_count, 2);
        assert_eq!(stats.pool_count, 3);
        assert_eq!(stats.refreshes, 2);
    }
}
