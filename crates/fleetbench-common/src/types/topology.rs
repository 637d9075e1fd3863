//! Topology intent (one primary, N remotes) and its derived status view

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{ClusterConfig, ClusterStatus, ServiceDiscoveryStatus};
use crate::{Error, Result};

/// Default SPIFFE-style trust domain for federated clusters
pub const DEFAULT_TRUST_DOMAIN: &str = "cluster.local";

/// A named set of one primary and zero or more remote clusters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTopology {
    /// Topology name, used for logging and reports
    pub name: String,
    /// Primary cluster; created first, deleted last
    pub primary: ClusterConfig,
    /// Remote clusters keyed by name
    #[serde(default)]
    pub remotes: BTreeMap<String, ClusterConfig>,
    /// Cross-cluster trust and discovery selection
    #[serde(default)]
    pub federation: FederationConfig,
    /// Cross-cluster reachability hints
    #[serde(default)]
    pub network: NetworkConfig,
}

impl ClusterTopology {
    /// Create a topology with only a primary cluster
    pub fn new(name: impl Into<String>, primary: ClusterConfig) -> Self {
        Self {
            name: name.into(),
            primary,
            remotes: BTreeMap::new(),
            federation: FederationConfig::default(),
            network: NetworkConfig::default(),
        }
    }

    /// Add a remote cluster keyed by its own name
    pub fn with_remote(mut self, remote: ClusterConfig) -> Self {
        self.remotes.insert(remote.name.clone(), remote);
        self
    }

    /// Set the federation config
    pub fn with_federation(mut self, federation: FederationConfig) -> Self {
        self.federation = federation;
        self
    }

    /// Validate the topology invariants
    ///
    /// - every member has a valid name, provider and version
    /// - each remote map key equals the remote's own name
    /// - no remote shares the primary's name
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config_invalid_field(
                "topology",
                "name",
                "topology name must not be empty",
            ));
        }
        self.primary.validate()?;

        for (key, remote) in &self.remotes {
            remote.validate()?;
            if key != &remote.name {
                return Err(Error::config_invalid_field(
                    &self.name,
                    format!("remotes.{key}.name"),
                    format!("remote key '{}' does not match cluster name '{}'", key, remote.name),
                ));
            }
            if remote.name == self.primary.name {
                return Err(Error::config_invalid_field(
                    &self.name,
                    format!("remotes.{key}"),
                    format!("remote name '{}' collides with the primary cluster", remote.name),
                ));
            }
        }

        if self.federation.enabled && self.federation.trust_domain.trim().is_empty() {
            return Err(Error::config_invalid_field(
                &self.name,
                "federation.trustDomain",
                "trust domain is required when federation is enabled",
            ));
        }
        Ok(())
    }

    /// Every member config, primary first
    pub fn members(&self) -> impl Iterator<Item = &ClusterConfig> {
        std::iter::once(&self.primary).chain(self.remotes.values())
    }

    /// Every member name, primary first
    pub fn member_names(&self) -> Vec<String> {
        self.members().map(|c| c.name.clone()).collect()
    }

    /// Look up a member by name
    pub fn member(&self, name: &str) -> Option<&ClusterConfig> {
        self.members().find(|c| c.name == name)
    }

    /// Distinct provider identifiers used by the topology
    pub fn providers(&self) -> BTreeSet<&str> {
        self.members().map(|c| c.provider.as_str()).collect()
    }
}

/// Cross-cluster trust and discovery selection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationConfig {
    /// Whether federation should be wired after creation
    #[serde(default)]
    pub enabled: bool,
    /// Identity namespace used to validate cross-cluster certificates
    #[serde(default = "default_trust_domain")]
    pub trust_domain: String,
    /// Selected discovery mechanism (e.g. "dns", "aggregation")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<String>,
}

fn default_trust_domain() -> String {
    DEFAULT_TRUST_DOMAIN.to_string()
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trust_domain: default_trust_domain(),
            discovery: None,
        }
    }
}

/// How cross-cluster traffic reaches remote workloads
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GatewayMode {
    /// Pods are directly routable between clusters
    #[default]
    Flat,
    /// Traffic crosses an east-west gateway
    EastWestGateway,
}

/// Cross-cluster reachability hints
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Pod CIDR per cluster name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_cidrs: BTreeMap<String, String>,
    /// Service CIDR per cluster name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service_cidrs: BTreeMap<String, String>,
    /// Gateway mode
    #[serde(default)]
    pub gateway_mode: GatewayMode,
    /// Externally reachable API server endpoints per cluster name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub api_server_endpoints: BTreeMap<String, String>,
}

/// Observed federation state
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationStatus {
    /// Whether federation is enabled in the topology
    pub enabled: bool,
    /// Configured trust domain
    pub trust_domain: String,
    /// Discovery mechanism in use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mechanism: Option<String>,
    /// Clusters whose trust config was written
    #[serde(default)]
    pub configured: Vec<String>,
    /// Discovery status per cluster
    #[serde(default)]
    pub discovery: BTreeMap<String, ServiceDiscoveryStatus>,
}

impl FederationStatus {
    /// Whether every participating cluster reports healthy discovery
    pub fn healthy(&self) -> bool {
        !self.enabled || self.discovery.values().all(|s| s.healthy)
    }
}

/// Observed cross-cluster network view
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// Gateway mode from the topology
    pub gateway_mode: GatewayMode,
    /// Clusters currently running and addressable by peers
    pub connected: Vec<String>,
    /// Clusters that overlap another member's pod or service CIDR
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cidr_conflicts: Vec<String>,
}

/// Derived view of a topology, re-computable at any time
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyStatus {
    /// Topology name
    pub name: String,
    /// Primary status, absent if it could not be observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<ClusterStatus>,
    /// Remote statuses for every observed remote
    #[serde(default)]
    pub remotes: BTreeMap<String, ClusterStatus>,
    /// Members that could not be observed (not found or query failed)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
    /// True only if the primary and every remote are healthy
    pub healthy: bool,
    /// Federation view, when federation is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federation: Option<FederationStatus>,
    /// Network view
    pub network: NetworkStatus,
    /// Top-level error summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TopologyStatus {
    /// Every observed member status, primary first
    pub fn observed(&self) -> impl Iterator<Item = &ClusterStatus> {
        self.primary.iter().chain(self.remotes.values())
    }

    /// Whether a member was observed
    pub fn contains(&self, name: &str) -> bool {
        self.observed().any(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> ClusterTopology {
        ClusterTopology::new("lab", ClusterConfig::new("kind", "p1"))
            .with_remote(ClusterConfig::new("kind", "r1"))
            .with_remote(ClusterConfig::new("minikube", "r2"))
    }

    #[test]
    fn valid_topology_passes() {
        topology().validate().unwrap();
        assert_eq!(topology().member_names(), vec!["p1", "r1", "r2"]);
        assert_eq!(topology().providers().len(), 2);
    }

    #[test]
    fn primary_name_collision_is_rejected() {
        let t = topology().with_remote(ClusterConfig::new("kind", "p1"));
        let err = t.validate().unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
        assert!(err.to_string().contains("collides"));
    }

    #[test]
    fn remote_key_must_match_name() {
        let mut t = topology();
        t.remotes.insert("r3".into(), ClusterConfig::new("kind", "r4"));
        assert!(t.validate().is_err());
    }

    #[test]
    fn federation_requires_trust_domain() {
        let t = topology().with_federation(FederationConfig {
            enabled: true,
            trust_domain: " ".into(),
            discovery: Some("dns".into()),
        });
        assert!(t.validate().is_err());
    }

    #[test]
    fn parses_yaml_document() {
        let yaml = r#"
name: mesh-lab
primary:
  provider: kind
  name: p1
remotes:
  r1:
    provider: kind
    name: r1
    options:
      nodes: 2
federation:
  enabled: true
  discovery: dns
network:
  gatewayMode: eastWestGateway
"#;
        let t: ClusterTopology = serde_yaml::from_str(yaml).unwrap();
        t.validate().unwrap();
        assert_eq!(t.federation.trust_domain, DEFAULT_TRUST_DOMAIN);
        assert_eq!(t.network.gateway_mode, GatewayMode::EastWestGateway);
    }
}
