//! Pluggable cross-cluster service discovery
//!
//! Each mechanism implements [`ServiceDiscoveryProvider`] and is looked up by
//! identifier through a [`DiscoveryRegistry`]. Providers operate on a single
//! member cluster at a time through a [`ClusterApi`] handle; fanning out over
//! the participating clusters is the caller's job.
//!
//! Mechanisms shipped here:
//! - `dns`: federated zones forwarded by CoreDNS
//! - `aggregation`: an APIService registered with the kube-aggregator
//! - `propagation`: MCS `ServiceExport`s for selected services
//! - `manual`: static entries recorded in a ConfigMap

pub mod aggregation;
pub mod cluster_api;
pub mod corefile;
pub mod dns;
pub mod manual;
pub mod propagation;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use fleetbench_common::types::{HealthCheck, ServiceDiscoveryConfig, ServiceDiscoveryStatus};
use fleetbench_common::{Error, Result};

pub use cluster_api::{ClusterApi, KubeClusterApi, ObjectRef};

/// A cross-cluster service discovery mechanism
#[async_trait]
pub trait ServiceDiscoveryProvider: Send + Sync {
    /// Mechanism identifier used for registry lookup
    fn mechanism(&self) -> &str;

    /// Validate a configuration for this mechanism
    ///
    /// Disabled configurations are always valid. Enabled configurations need
    /// at least one participating cluster plus whatever the mechanism itself
    /// requires.
    fn validate_config(&self, config: &ServiceDiscoveryConfig) -> Result<()>;

    /// Install the mechanism on one cluster
    async fn install(&self, cluster: &dyn ClusterApi, config: &ServiceDiscoveryConfig)
        -> Result<()>;

    /// Remove everything `install` created on one cluster
    async fn uninstall(&self, cluster: &dyn ClusterApi, config: &ServiceDiscoveryConfig)
        -> Result<()>;

    /// Observed state on one cluster
    async fn status(
        &self,
        cluster: &dyn ClusterApi,
        config: &ServiceDiscoveryConfig,
    ) -> Result<ServiceDiscoveryStatus>;

    /// Independent named checks on one cluster
    async fn health_check(
        &self,
        cluster: &dyn ClusterApi,
        config: &ServiceDiscoveryConfig,
    ) -> Result<Vec<HealthCheck>>;
}

/// Checks shared by every mechanism, run before mechanism-specific validation
///
/// Returns `Ok(false)` when the configuration is disabled and nothing else
/// needs to be checked.
pub fn validate_common(mechanism: &str, config: &ServiceDiscoveryConfig) -> Result<bool> {
    if !config.enabled {
        return Ok(false);
    }
    if config.mechanism != mechanism {
        return Err(Error::config_invalid_field(
            mechanism,
            "mechanism",
            format!("configuration is for mechanism '{}'", config.mechanism),
        ));
    }
    if config.clusters.is_empty() {
        return Err(Error::config_invalid_field(
            mechanism,
            "clusters",
            "at least one participating cluster is required when enabled",
        ));
    }
    Ok(true)
}

/// Discovery providers keyed by mechanism identifier
#[derive(Clone, Default)]
pub struct DiscoveryRegistry {
    providers: HashMap<String, Arc<dyn ServiceDiscoveryProvider>>,
}

impl DiscoveryRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in mechanism
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(dns::DnsDiscovery));
        registry.register(Arc::new(aggregation::AggregationDiscovery));
        registry.register(Arc::new(propagation::PropagationDiscovery));
        registry.register(Arc::new(manual::ManualDiscovery));
        registry
    }

    /// Register a provider under its mechanism identifier, replacing any previous one
    pub fn register(&mut self, provider: Arc<dyn ServiceDiscoveryProvider>) {
        self.providers.insert(provider.mechanism().to_string(), provider);
    }

    /// Look up a provider
    pub fn get(&self, mechanism: &str) -> Result<Arc<dyn ServiceDiscoveryProvider>> {
        self.providers
            .get(mechanism)
            .cloned()
            .ok_or_else(|| Error::DiscoveryNotFound {
                mechanism: mechanism.to_string(),
            })
    }

    /// Registered mechanism identifiers, sorted
    pub fn mechanisms(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
