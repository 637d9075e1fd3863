//! Cluster intent and observed cluster state

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::OptionBag;
use crate::{Error, Result};

/// Default Kubernetes version used when a cluster config leaves it empty
pub const DEFAULT_KUBERNETES_VERSION: &str = "v1.31.0";

/// Immutable intent for one cluster
///
/// Created by the caller and never mutated after submission to the
/// topology manager.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Cluster provider identifier (e.g. "kind", "minikube")
    pub provider: String,
    /// Cluster name, unique within a topology
    pub name: String,
    /// Kubernetes version (e.g. "v1.31.0")
    #[serde(default = "default_kubernetes_version")]
    pub kubernetes_version: String,
    /// Provider-specific options (node count, memory, driver, addons)
    #[serde(default, skip_serializing_if = "OptionBag::is_empty")]
    pub options: OptionBag,
}

fn default_kubernetes_version() -> String {
    DEFAULT_KUBERNETES_VERSION.to_string()
}

impl ClusterConfig {
    /// Create a config with the default Kubernetes version and no options
    pub fn new(provider: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            name: name.into(),
            kubernetes_version: default_kubernetes_version(),
            options: OptionBag::new(),
        }
    }

    /// Set the Kubernetes version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.kubernetes_version = version.into();
        self
    }

    /// Set the option bag
    pub fn with_options(mut self, options: OptionBag) -> Self {
        self.options = options;
        self
    }

    /// Provider-independent checks: name shape and version presence
    pub fn validate(&self) -> Result<()> {
        validate_cluster_name(&self.name)?;
        if self.provider.trim().is_empty() {
            return Err(Error::config_invalid_field(
                &self.name,
                "provider",
                "provider must not be empty",
            ));
        }
        if self.kubernetes_version.trim().is_empty() {
            return Err(Error::config_invalid_field(
                &self.name,
                "kubernetesVersion",
                "kubernetes version must not be empty",
            ));
        }
        Ok(())
    }

    /// Kubernetes version with a leading `v`
    pub fn version_tag(&self) -> String {
        let v = self.kubernetes_version.trim();
        if v.starts_with('v') {
            v.to_string()
        } else {
            format!("v{v}")
        }
    }
}

/// Validate that a cluster name is a DNS-1123 label
///
/// kind and minikube both derive container and context names from it.
pub fn validate_cluster_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(Error::config_invalid_field(
            name,
            "name",
            "cluster name must be a lowercase DNS label (a-z, 0-9, '-', at most 63 chars)",
        ))
    }
}

/// Lifecycle state reported by a cluster provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    /// Provisioning in progress
    Creating,
    /// All nodes ready
    Running,
    /// Reachable but some nodes are not ready
    Degraded,
    /// Provider reports an error or the API is unreachable
    Error,
    /// Cluster no longer exists
    Deleted,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterState::Creating => "creating",
            ClusterState::Running => "running",
            ClusterState::Degraded => "degraded",
            ClusterState::Error => "error",
            ClusterState::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Observed state of one cluster, produced per query and never cached
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Cluster name
    pub name: String,
    /// Lifecycle state
    pub state: ClusterState,
    /// Total node count
    pub nodes: u32,
    /// Nodes reporting Ready
    pub ready_nodes: u32,
    /// Kubernetes server version, when reachable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// True only when the cluster is running and every node is ready
    pub healthy: bool,
    /// Error text, when the provider reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When this status was observed
    pub last_observed: DateTime<Utc>,
}

impl ClusterStatus {
    /// Build a status from node counts, deriving state and health
    pub fn from_nodes(name: impl Into<String>, nodes: u32, ready: u32, version: Option<String>) -> Self {
        let state = match (nodes, ready) {
            (0, _) => ClusterState::Creating,
            (n, r) if r >= n => ClusterState::Running,
            _ => ClusterState::Degraded,
        };
        Self {
            name: name.into(),
            state,
            nodes,
            ready_nodes: ready,
            version,
            healthy: state == ClusterState::Running,
            error: None,
            last_observed: Utc::now(),
        }
    }

    /// Status for a cluster whose API server could not be queried
    pub fn errored(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ClusterState::Error,
            nodes: 0,
            ready_nodes: 0,
            version: None,
            healthy: false,
            error: Some(error.into()),
            last_observed: Utc::now(),
        }
    }
}
