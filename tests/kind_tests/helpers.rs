//! Shared fixtures for the kind stories

use std::time::Duration;

use fleetbench_cluster::{ClusterProviderRegistry, TopologyManager};
use fleetbench_common::config::TimeoutSettings;
use fleetbench_common::types::{ClusterConfig, ClusterTopology, FederationConfig};

/// Topology of a primary and one remote, both single-node kind clusters
pub fn two_cluster_topology(prefix: &str) -> ClusterTopology {
    ClusterTopology::new(prefix, ClusterConfig::new("kind", format!("{prefix}-p1")))
        .with_remote(ClusterConfig::new("kind", format!("{prefix}-r1")))
}

/// Same topology with DNS federation enabled
pub fn federated_topology(prefix: &str) -> ClusterTopology {
    two_cluster_topology(prefix).with_federation(FederationConfig {
        enabled: true,
        trust_domain: format!("{prefix}.local"),
        discovery: Some("dns".into()),
    })
}

/// Manager over the real providers with timeouts generous enough for CI
pub fn manager() -> TopologyManager {
    let timeouts = TimeoutSettings {
        create: Duration::from_secs(600),
        health_wait: Duration::from_secs(300),
        ..TimeoutSettings::default()
    };
    TopologyManager::new(ClusterProviderRegistry::with_defaults(), timeouts)
}

/// Deletes the topology when dropped so a failed assertion does not leak clusters
pub struct Cleanup {
    topology: ClusterTopology,
}

impl Cleanup {
    pub fn new(topology: &ClusterTopology) -> Self {
        Self {
            topology: topology.clone(),
        }
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        for member in self.topology.members() {
            let _ = std::process::Command::new("kind")
                .args(["delete", "cluster", "--name", &member.name])
                .status();
        }
    }
}
