//! Topology lifecycle: create, delete and observe a primary plus remotes
//!
//! # Ordering
//!
//! The primary is created first and must become healthy before any remote
//! is attempted. Remotes are then created concurrently; one remote failing
//! never cancels its siblings and nothing is rolled back. Deletion runs the
//! other way round: every remote concurrently, then the primary.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use fleetbench_common::config::TimeoutSettings;
use fleetbench_common::kube_utils::poll_until;
use fleetbench_common::types::{
    ClusterConfig, ClusterState, ClusterStatus, ClusterTarget, ClusterTopology, NetworkConfig,
    NetworkStatus, TestEnvironment, TopologyStatus,
};
use fleetbench_common::{EntityFailure, Error, Result};

use crate::provider::{ClusterProvider, ClusterProviderRegistry};

/// Outcome of a best-effort teardown
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    /// Members deleted (or already absent), in deletion order
    pub deleted: Vec<String>,
    /// Members whose deletion failed
    pub failed: Vec<EntityFailure>,
}

impl DeleteReport {
    /// Whether every member was deleted
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Convert failures into an aggregate error
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.failed.is_empty() {
            Ok(self.deleted)
        } else {
            Err(Error::aggregate("delete topology", self.failed))
        }
    }
}

/// Creates, deletes and observes topologies through cluster providers
pub struct TopologyManager {
    providers: ClusterProviderRegistry,
    timeouts: TimeoutSettings,
}

/// Run `fut` under a deadline, reporting expiry as [`Error::Timeout`]
async fn with_timeout<T>(
    after: Duration,
    operation: &str,
    entity: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(operation, entity, after)),
    }
}

fn failure(entity: &str, error: &Error) -> EntityFailure {
    EntityFailure {
        entity: entity.to_string(),
        message: error.to_string(),
    }
}

impl TopologyManager {
    /// Create a manager over the given providers
    pub fn new(providers: ClusterProviderRegistry, timeouts: TimeoutSettings) -> Self {
        Self {
            providers,
            timeouts,
        }
    }

    /// Provider registry in use
    pub fn providers(&self) -> &ClusterProviderRegistry {
        &self.providers
    }

    /// Reject a topology before any side effect
    ///
    /// Checks the topology invariants and lets each member's provider
    /// validate its options.
    pub fn validate_topology(&self, topology: &ClusterTopology) -> Result<()> {
        topology.validate()?;
        for member in topology.members() {
            self.providers.for_config(member)?.validate(member)?;
        }
        Ok(())
    }

    /// Create the primary, wait for it, then create every remote concurrently
    ///
    /// Returns an aggregate error naming every failed remote. Created
    /// clusters are left running whatever the outcome.
    pub async fn create_topology(&self, topology: &ClusterTopology) -> Result<()> {
        self.validate_topology(topology)?;
        info!(
            topology = %topology.name,
            primary = %topology.primary.name,
            remotes = topology.remotes.len(),
            "Creating topology"
        );

        if let Err(e) = self.create_member(&topology.primary).await {
            warn!(
                topology = %topology.name,
                cluster = %topology.primary.name,
                error = %e,
                "Primary creation failed, not attempting remotes"
            );
            return Err(e);
        }

        let results = join_all(
            topology
                .remotes
                .values()
                .map(|remote| async move { (remote.name.as_str(), self.create_member(remote).await) }),
        )
        .await;

        let failures: Vec<EntityFailure> = results
            .iter()
            .filter_map(|(name, result)| result.as_ref().err().map(|e| failure(name, e)))
            .collect();
        if !failures.is_empty() {
            for f in &failures {
                warn!(topology = %topology.name, cluster = %f.entity, error = %f.message, "Remote creation failed");
            }
            return Err(Error::aggregate("create remotes", failures));
        }

        info!(topology = %topology.name, "Topology created");
        Ok(())
    }

    /// Delete every remote concurrently, then the primary
    ///
    /// Every member is attempted exactly once; failures are logged and
    /// collected rather than aborting the teardown.
    pub async fn delete_topology(&self, topology: &ClusterTopology) -> DeleteReport {
        info!(topology = %topology.name, "Deleting topology");
        let mut report = DeleteReport::default();

        let remote_results = join_all(
            topology
                .remotes
                .values()
                .map(|remote| async move { (remote.name.as_str(), self.delete_member(remote).await) }),
        )
        .await;

        let primary_result = self.delete_member(&topology.primary).await;

        let all = remote_results
            .into_iter()
            .chain(std::iter::once((topology.primary.name.as_str(), primary_result)));
        for (name, result) in all {
            match result {
                Ok(()) => report.deleted.push(name.to_string()),
                Err(e) => {
                    warn!(topology = %topology.name, cluster = %name, error = %e, "Failed to delete cluster, continuing");
                    report.failed.push(failure(name, &e));
                }
            }
        }
        report
    }

    /// Observe every member concurrently and derive topology health
    pub async fn get_topology_status(&self, topology: &ClusterTopology) -> TopologyStatus {
        let observations = join_all(topology.members().map(|member| async move {
            (member.name.clone(), self.observe_member(member).await)
        }))
        .await;

        let mut primary = None;
        let mut remotes = BTreeMap::new();
        let mut missing = Vec::new();
        let mut errors = Vec::new();
        for (name, observation) in observations {
            match observation {
                Ok(status) if name == topology.primary.name => primary = Some(status),
                Ok(status) => {
                    remotes.insert(name, status);
                }
                Err(e) => {
                    errors.push(format!("{name}: {e}"));
                    missing.push(name);
                }
            }
        }

        let healthy = missing.is_empty()
            && primary.as_ref().is_some_and(|p| p.healthy)
            && remotes.values().all(|r| r.healthy);
        let connected = primary
            .iter()
            .chain(remotes.values())
            .filter(|s| s.state == ClusterState::Running)
            .map(|s| s.name.clone())
            .collect();

        TopologyStatus {
            name: topology.name.clone(),
            primary,
            remotes,
            missing,
            healthy,
            federation: None,
            network: NetworkStatus {
                gateway_mode: topology.network.gateway_mode,
                connected,
                cidr_conflicts: cidr_conflicts(&topology.network),
            },
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }

    /// Clusters known to a provider
    pub async fn list_clusters(&self, provider: &str) -> Result<Vec<String>> {
        self.providers.get(provider)?.list().await
    }

    /// Connection details for the members that can be reached, for the test coordinator
    ///
    /// Members whose kubeconfig cannot be resolved are logged and left out,
    /// so tests can still target the rest of a partial topology. Fails only
    /// when no member resolves.
    pub async fn environment(&self, topology: &ClusterTopology) -> Result<TestEnvironment> {
        let primary_name = topology.primary.name.as_str();
        let lookups = join_all(
            topology
                .members()
                .map(|member| async move { (member, self.member_kubeconfig(member).await) }),
        )
        .await;

        let mut env = TestEnvironment::new();
        let mut failures = Vec::new();
        for (member, kubeconfig) in lookups {
            match kubeconfig {
                Ok(kubeconfig) => {
                    env = env.with_cluster(ClusterTarget {
                        name: member.name.clone(),
                        kubeconfig,
                        primary: member.name == primary_name,
                    })
                }
                Err(e) => {
                    warn!(cluster = %member.name, error = %e, "Leaving cluster out of the test environment");
                    failures.push(failure(&member.name, &e));
                }
            }
        }
        if env.clusters.is_empty() {
            return Err(Error::aggregate("resolve environment", failures));
        }
        Ok(env)
    }

    /// Create a single cluster and wait for it to become healthy
    pub async fn create_cluster(&self, config: &ClusterConfig) -> Result<()> {
        config.validate()?;
        self.providers.for_config(config)?.validate(config)?;
        self.create_member(config).await
    }

    /// Delete a single cluster
    pub async fn delete_cluster(&self, config: &ClusterConfig) -> Result<()> {
        self.delete_member(config).await
    }

    /// Observe a single cluster
    pub async fn cluster_status(&self, config: &ClusterConfig) -> Result<ClusterStatus> {
        self.observe_member(config).await
    }

    async fn create_member(&self, config: &ClusterConfig) -> Result<()> {
        let provider = self.providers.for_config(config)?;
        let name = config.name.as_str();

        info!(cluster = %name, provider = %config.provider, version = %config.kubernetes_version, "Creating cluster");
        with_timeout(self.timeouts.create, "create", name, provider.create(config)).await?;
        self.wait_healthy(provider, name).await?;
        info!(cluster = %name, provider = %config.provider, "Cluster ready");
        Ok(())
    }

    async fn wait_healthy(&self, provider: Arc<dyn ClusterProvider>, name: &str) -> Result<()> {
        let provider = &provider;
        poll_until(
            self.timeouts.health_wait,
            self.timeouts.health_poll_interval,
            "health-wait",
            name,
            || async move { Ok::<_, Error>(provider.status(name).await?.healthy) },
        )
        .await
    }

    async fn delete_member(&self, config: &ClusterConfig) -> Result<()> {
        let provider = self.providers.for_config(config)?;
        info!(cluster = %config.name, provider = %config.provider, "Deleting cluster");
        with_timeout(
            self.timeouts.delete,
            "delete",
            &config.name,
            provider.delete(&config.name),
        )
        .await
    }

    async fn member_kubeconfig(&self, config: &ClusterConfig) -> Result<String> {
        let provider = self.providers.for_config(config)?;
        with_timeout(
            self.timeouts.status,
            "kubeconfig",
            &config.name,
            provider.kubeconfig(&config.name),
        )
        .await
    }

    async fn observe_member(&self, config: &ClusterConfig) -> Result<ClusterStatus> {
        let provider = self.providers.for_config(config)?;
        with_timeout(
            self.timeouts.status,
            "status",
            &config.name,
            provider.status(&config.name),
        )
        .await
    }
}

fn parse_ipv4_cidr(cidr: &str) -> Option<(u32, u32)> {
    let (addr, prefix) = cidr.trim().split_once('/')?;
    let addr: Ipv4Addr = addr.parse().ok()?;
    let prefix: u32 = prefix.parse().ok()?;
    (prefix <= 32).then_some((u32::from(addr), prefix))
}

fn overlaps(a: &str, b: &str) -> bool {
    match (parse_ipv4_cidr(a), parse_ipv4_cidr(b)) {
        (Some((a_addr, a_len)), Some((b_addr, b_len))) => {
            let len = a_len.min(b_len);
            let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
            a_addr & mask == b_addr & mask
        }
        _ => false,
    }
}

/// Clusters whose pod or service range overlaps another member's
fn cidr_conflicts(network: &NetworkConfig) -> Vec<String> {
    let ranges: Vec<(&str, &str)> = network
        .pod_cidrs
        .iter()
        .chain(network.service_cidrs.iter())
        .map(|(cluster, cidr)| (cluster.as_str(), cidr.as_str()))
        .collect();

    let mut conflicts = std::collections::BTreeSet::new();
    for (i, (a_cluster, a_cidr)) in ranges.iter().enumerate() {
        for (b_cluster, b_cidr) in &ranges[i + 1..] {
            if a_cluster != b_cluster && overlaps(a_cidr, b_cidr) {
                conflicts.insert(a_cluster.to_string());
                conflicts.insert(b_cluster.to_string());
            }
        }
    }
    conflicts.into_iter().collect()
}
