//! Cluster providers
//!
//! A provider creates, deletes and observes single named clusters of one
//! backing technology. Providers are stateless beyond what the backing
//! technology stores, so the same provider instance serves every cluster of
//! a topology.

pub mod command;
pub mod kind;
pub mod minikube;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use fleetbench_common::kube_utils;
use fleetbench_common::types::{ClusterConfig, ClusterStatus};
use fleetbench_common::{Error, Result};

pub use command::{CommandOutput, CommandRunner, TokioCommandRunner};
pub use kind::KindProvider;
pub use minikube::MinikubeProvider;

/// Backend that manages clusters of one technology
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// Provider identifier used in `ClusterConfig::provider`
    fn id(&self) -> &'static str;

    /// Validate provider options before any side effect
    fn validate(&self, config: &ClusterConfig) -> Result<()>;

    /// Create a cluster; returns once the provider reports it created
    async fn create(&self, config: &ClusterConfig) -> Result<()>;

    /// Delete a cluster; deleting an absent cluster succeeds
    async fn delete(&self, name: &str) -> Result<()>;

    /// Observe a cluster; `ClusterNotFound` when the provider does not know it
    async fn status(&self, name: &str) -> Result<ClusterStatus>;

    /// Kubeconfig document for connecting to a cluster
    async fn kubeconfig(&self, name: &str) -> Result<String>;

    /// Names of every cluster the provider knows
    async fn list(&self) -> Result<Vec<String>>;
}

/// Query node readiness and version through the cluster's API server
///
/// API failures yield an `Error` status rather than an error so callers can
/// still report the cluster as present.
pub(crate) async fn observe_nodes(name: &str, kubeconfig: &str) -> ClusterStatus {
    let observed = async {
        let client = kube_utils::client_from_kubeconfig(kubeconfig).await?;
        let (nodes, ready) = kube_utils::node_readiness(&client).await?;
        let version = kube_utils::server_version(&client).await.ok();
        Ok::<_, Error>(ClusterStatus::from_nodes(name, nodes, ready, version))
    }
    .await;
    match observed {
        Ok(status) => status,
        Err(e) => {
            debug!(cluster = %name, error = %e, "Cluster API not reachable");
            ClusterStatus::errored(name, e.to_string())
        }
    }
}

/// Cluster providers keyed by identifier
#[derive(Clone, Default)]
pub struct ClusterProviderRegistry {
    providers: HashMap<String, Arc<dyn ClusterProvider>>,
}

impl ClusterProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the kind and minikube providers using real processes
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(KindProvider::default()));
        registry.register(Arc::new(MinikubeProvider::default()));
        registry
    }

    /// Register a provider under its identifier, replacing any previous one
    pub fn register(&mut self, provider: Arc<dyn ClusterProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    /// Look up a provider
    pub fn get(&self, id: &str) -> Result<Arc<dyn ClusterProvider>> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("cluster provider", id))
    }

    /// Look up the provider owning a cluster config
    pub fn for_config(&self, config: &ClusterConfig) -> Result<Arc<dyn ClusterProvider>> {
        self.get(&config.provider).map_err(|_| {
            Error::config_invalid_field(
                &config.name,
                "provider",
                format!("unknown cluster provider '{}'", config.provider),
            )
        })
    }

    /// Registered identifiers, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
