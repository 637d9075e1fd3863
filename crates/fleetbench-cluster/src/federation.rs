//! Cross-cluster trust and service discovery setup for a topology
//!
//! The configurator writes a trust ConfigMap on every participating member
//! and installs the selected discovery mechanism where it is not already
//! present. Members are handled concurrently and one failing member never
//! stops the others.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use fleetbench_common::types::{
    ClusterConfig, ClusterTopology, FederationStatus, ServiceDiscoveryConfig,
    ServiceDiscoveryStatus,
};
use fleetbench_common::{EntityFailure, Error, Result, FLEETBENCH_NAMESPACE};
use fleetbench_discovery::{
    ClusterApi, DiscoveryRegistry, KubeClusterApi, ServiceDiscoveryProvider,
};

use crate::provider::ClusterProviderRegistry;
use crate::topology::DeleteReport;

/// ConfigMap carrying the federation trust settings on each member
pub const TRUST_CONFIG_MAP: &str = "fleetbench-federation";

/// Opens API handles to topology members
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Connect to a member cluster
    async fn connect(&self, member: &ClusterConfig) -> Result<Arc<dyn ClusterApi>>;
}

/// Connects through the kubeconfig reported by the member's provider
#[derive(Clone)]
pub struct ProviderConnector {
    providers: ClusterProviderRegistry,
}

impl ProviderConnector {
    /// Create a connector over the given providers
    pub fn new(providers: ClusterProviderRegistry) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl ClusterConnector for ProviderConnector {
    async fn connect(&self, member: &ClusterConfig) -> Result<Arc<dyn ClusterApi>> {
        let provider = self.providers.for_config(member)?;
        let kubeconfig = provider.kubeconfig(&member.name).await?;
        let api = KubeClusterApi::from_kubeconfig(&member.name, &kubeconfig).await?;
        Ok(Arc::new(api))
    }
}

/// Configures federation trust and discovery across a topology
pub struct FederationConfigurator {
    discovery: DiscoveryRegistry,
    connector: Arc<dyn ClusterConnector>,
}

fn failure(entity: &str, error: &Error) -> EntityFailure {
    EntityFailure {
        entity: entity.to_string(),
        message: error.to_string(),
    }
}

impl FederationConfigurator {
    /// Create a configurator
    pub fn new(discovery: DiscoveryRegistry, connector: Arc<dyn ClusterConnector>) -> Self {
        Self {
            discovery,
            connector,
        }
    }

    /// Configurator that reaches members through their providers' kubeconfigs
    pub fn from_providers(discovery: DiscoveryRegistry, providers: ClusterProviderRegistry) -> Self {
        Self::new(discovery, Arc::new(ProviderConnector::new(providers)))
    }

    /// Write trust config and install discovery on every participating member
    ///
    /// Discovery is only installed where its status reports it missing, so
    /// running this twice is harmless. Failures are collected per member and
    /// returned together once every member has settled.
    pub async fn configure(
        &self,
        topology: &ClusterTopology,
        discovery: &ServiceDiscoveryConfig,
    ) -> Result<FederationStatus> {
        let (provider, members) = self.prepare(topology, discovery)?;
        let peers: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
        info!(
            topology = %topology.name,
            mechanism = %discovery.mechanism,
            clusters = members.len(),
            "Configuring federation"
        );

        let results = join_all(members.iter().map(|member| {
            let provider = provider.clone();
            let peers = &peers;
            async move {
                let outcome = self
                    .configure_member(topology, member, peers, provider.as_ref(), discovery)
                    .await;
                (member.name.as_str(), outcome)
            }
        }))
        .await;

        let mut status = self.empty_status(topology, discovery);
        let mut failures = Vec::new();
        for (name, outcome) in results {
            match outcome {
                Ok(observed) => {
                    status.configured.push(name.to_string());
                    if let Some(observed) = observed {
                        status.discovery.insert(name.to_string(), observed);
                    }
                }
                Err(e) => {
                    warn!(topology = %topology.name, cluster = %name, error = %e, "Federation setup failed");
                    failures.push(failure(name, &e));
                }
            }
        }
        if !failures.is_empty() {
            return Err(Error::aggregate("configure federation", failures));
        }
        info!(topology = %topology.name, configured = status.configured.len(), "Federation configured");
        Ok(status)
    }

    /// Observe trust config and discovery state without changing anything
    ///
    /// Members that cannot be reached are reported with an errored discovery
    /// status instead of failing the whole view.
    pub async fn status(
        &self,
        topology: &ClusterTopology,
        discovery: &ServiceDiscoveryConfig,
    ) -> Result<FederationStatus> {
        let (provider, members) = self.prepare(topology, discovery)?;
        let observations = join_all(members.iter().map(|member| {
            let provider = provider.clone();
            async move {
                let observed = async {
                    let api = self.connector.connect(member).await?;
                    let trusted = api
                        .get_config_map(FLEETBENCH_NAMESPACE, TRUST_CONFIG_MAP)
                        .await?
                        .is_some();
                    let discovery_status = match &provider {
                        Some(p) => Some(p.status(api.as_ref(), discovery).await?),
                        None => None,
                    };
                    Ok::<_, Error>((trusted, discovery_status))
                }
                .await;
                (member.name.as_str(), observed)
            }
        }))
        .await;

        let mut status = self.empty_status(topology, discovery);
        for (name, observed) in observations {
            match observed {
                Ok((trusted, discovery_status)) => {
                    if trusted {
                        status.configured.push(name.to_string());
                    }
                    if let Some(s) = discovery_status {
                        status.discovery.insert(name.to_string(), s);
                    }
                }
                Err(e) => {
                    debug!(cluster = %name, error = %e, "Federation status unavailable");
                    status.discovery.insert(
                        name.to_string(),
                        ServiceDiscoveryStatus::errored(&discovery.mechanism, e.to_string()),
                    );
                }
            }
        }
        Ok(status)
    }

    /// Uninstall discovery and remove trust config, best-effort
    ///
    /// Every participating member is attempted once; failures are reported
    /// rather than aborting the teardown.
    pub async fn teardown(
        &self,
        topology: &ClusterTopology,
        discovery: &ServiceDiscoveryConfig,
    ) -> Result<DeleteReport> {
        let (provider, members) = self.prepare(topology, discovery)?;
        info!(topology = %topology.name, mechanism = %discovery.mechanism, "Tearing down federation");

        let results = join_all(members.iter().map(|member| {
            let provider = provider.clone();
            async move {
                let outcome = async {
                    let api = self.connector.connect(member).await?;
                    if let Some(p) = &provider {
                        p.uninstall(api.as_ref(), discovery).await?;
                    }
                    api.delete_config_map(FLEETBENCH_NAMESPACE, TRUST_CONFIG_MAP)
                        .await
                }
                .await;
                (member.name.as_str(), outcome)
            }
        }))
        .await;

        let mut report = DeleteReport::default();
        for (name, outcome) in results {
            match outcome {
                Ok(()) => report.deleted.push(name.to_string()),
                Err(e) => {
                    warn!(cluster = %name, error = %e, "Federation teardown failed, continuing");
                    report.failed.push(failure(name, &e));
                }
            }
        }
        Ok(report)
    }

    /// Validate inputs and resolve the participating members
    ///
    /// The discovery provider is `None` when discovery is disabled; trust
    /// config then goes to every member.
    #[allow(clippy::type_complexity)]
    fn prepare<'t>(
        &self,
        topology: &'t ClusterTopology,
        discovery: &ServiceDiscoveryConfig,
    ) -> Result<(Option<Arc<dyn ServiceDiscoveryProvider>>, Vec<&'t ClusterConfig>)> {
        if !topology.federation.enabled {
            return Err(Error::config_invalid_field(
                &topology.name,
                "federation.enabled",
                "federation is not enabled for this topology",
            ));
        }
        if let Some(selected) = &topology.federation.discovery {
            if selected != &discovery.mechanism {
                return Err(Error::config_invalid_field(
                    &topology.name,
                    "federation.discovery",
                    format!(
                        "topology selects '{selected}' but discovery config is for '{}'",
                        discovery.mechanism
                    ),
                ));
            }
        }

        let provider = self.discovery.get(&discovery.mechanism)?;
        provider.validate_config(discovery)?;

        if !discovery.enabled {
            return Ok((None, topology.members().collect()));
        }

        let wanted: BTreeSet<&str> = discovery.clusters.iter().map(String::as_str).collect();
        if let Some(unknown) = wanted.iter().find(|c| topology.member(c).is_none()) {
            return Err(Error::config_invalid_field(
                &discovery.mechanism,
                "clusters",
                format!("'{unknown}' is not a member of topology '{}'", topology.name),
            ));
        }
        let members = topology
            .members()
            .filter(|m| wanted.contains(m.name.as_str()))
            .collect();
        Ok((Some(provider), members))
    }

    fn empty_status(
        &self,
        topology: &ClusterTopology,
        discovery: &ServiceDiscoveryConfig,
    ) -> FederationStatus {
        FederationStatus {
            enabled: topology.federation.enabled,
            trust_domain: topology.federation.trust_domain.clone(),
            mechanism: discovery.enabled.then(|| discovery.mechanism.clone()),
            configured: Vec::new(),
            discovery: BTreeMap::new(),
        }
    }

    async fn configure_member(
        &self,
        topology: &ClusterTopology,
        member: &ClusterConfig,
        peers: &[&str],
        provider: Option<&Arc<dyn ServiceDiscoveryProvider>>,
        discovery: &ServiceDiscoveryConfig,
    ) -> Result<Option<ServiceDiscoveryStatus>> {
        let api = self.connector.connect(member).await?;
        let name = member.name.as_str();

        api.ensure_namespace(FLEETBENCH_NAMESPACE).await?;
        api.apply_config_map(FLEETBENCH_NAMESPACE, TRUST_CONFIG_MAP, trust_data(topology, name, peers))
            .await?;
        debug!(cluster = %name, "Wrote federation trust config");

        let Some(provider) = provider else {
            return Ok(None);
        };

        let current = provider.status(api.as_ref(), discovery).await?;
        if current.state.is_installed() {
            debug!(cluster = %name, mechanism = %discovery.mechanism, state = %current.state, "Discovery already installed");
            return Ok(Some(current));
        }

        provider.install(api.as_ref(), discovery).await?;
        info!(cluster = %name, mechanism = %discovery.mechanism, "Installed service discovery");
        provider.status(api.as_ref(), discovery).await.map(Some)
    }
}

fn trust_data(topology: &ClusterTopology, cluster: &str, peers: &[&str]) -> BTreeMap<String, String> {
    let peers: Vec<&str> = peers.iter().copied().filter(|p| *p != cluster).collect();
    BTreeMap::from([
        ("trustDomain".to_string(), topology.federation.trust_domain.clone()),
        ("clusterName".to_string(), cluster.to_string()),
        ("topology".to_string(), topology.name.clone()),
        ("peers".to_string(), peers.join(",")),
    ])
}
