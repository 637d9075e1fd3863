//! Declarative configuration document
//!
//! One YAML document describes a topology, its service discovery settings and
//! the tests to run against it:
//!
//! ```yaml
//! topology:
//!   name: mesh-lab
//!   primary: { provider: kind, name: p1 }
//!   remotes:
//!     r1: { provider: kind, name: r1 }
//!   federation: { enabled: true, discovery: dns }
//! serviceDiscovery:
//!   mechanism: dns
//!   enabled: true
//!   clusters: [p1, r1]
//!   options: { nameservers: [10.96.0.10] }
//! tests:
//!   - { name: smoke, type: command, options: { command: ./smoke.sh } }
//! multiClusterTests:
//!   - { name: mesh, type: command, parallel: true, options: { command: ./mesh.sh } }
//! coordinator:
//!   maxRetries: 1
//!   retryDelay: 5s
//! timeouts:
//!   create: 10m
//! ```
//!
//! The document is validated as a whole before anything is handed to the
//! topology manager or coordinator; mechanism- and provider-specific option
//! validation happens later in the owning provider.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::duration::human;
use crate::types::testing::{DEFAULT_RETRY_DELAY, DEFAULT_TEST_TIMEOUT};
use crate::types::{
    ClusterTopology, MultiClusterTestConfig, RetryPolicy, ServiceDiscoveryConfig, TestConfig,
};
use crate::{Error, Result};

/// Default config file name looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "fleetbench.yaml";

/// Finished executions a coordinator remembers by default
pub const DEFAULT_RETAINED_EXECUTIONS: usize = 100;

/// Environment variable overriding the config path
pub const CONFIG_ENV: &str = "FLEETBENCH_CONFIG";

/// Per-operation timeouts for topology lifecycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutSettings {
    /// Cluster creation, per cluster
    #[serde(default = "default_create", with = "human")]
    pub create: Duration,
    /// Cluster deletion, per cluster
    #[serde(default = "default_delete", with = "human")]
    pub delete: Duration,
    /// Status query, per cluster
    #[serde(default = "default_status", with = "human")]
    pub status: Duration,
    /// Waiting for a created cluster to report healthy
    #[serde(default = "default_health_wait", with = "human")]
    pub health_wait: Duration,
    /// Interval between health polls
    #[serde(default = "default_health_poll", with = "human")]
    pub health_poll_interval: Duration,
}

fn default_create() -> Duration {
    Duration::from_secs(10 * 60)
}
fn default_delete() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_status() -> Duration {
    Duration::from_secs(30)
}
fn default_health_wait() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_health_poll() -> Duration {
    Duration::from_secs(5)
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            create: default_create(),
            delete: default_delete(),
            status: default_status(),
            health_wait: default_health_wait(),
            health_poll_interval: default_health_poll(),
        }
    }
}

/// Defaults the coordinator applies to single-cluster runs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorSettings {
    /// Per-attempt timeout
    #[serde(default = "default_test_timeout", with = "human")]
    pub default_timeout: Duration,
    /// Retries after the first attempt on transient failures
    #[serde(default)]
    pub max_retries: u32,
    /// Fixed delay between attempts
    #[serde(default = "default_retry_delay", with = "human")]
    pub retry_delay: Duration,
    /// Finished executions kept for status queries; older ones are evicted
    #[serde(default = "default_retained_executions")]
    pub retained_executions: usize,
}

fn default_test_timeout() -> Duration {
    DEFAULT_TEST_TIMEOUT
}
fn default_retry_delay() -> Duration {
    DEFAULT_RETRY_DELAY
}
fn default_retained_executions() -> usize {
    DEFAULT_RETAINED_EXECUTIONS
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TEST_TIMEOUT,
            max_retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            retained_executions: DEFAULT_RETAINED_EXECUTIONS,
        }
    }
}

impl CoordinatorSettings {
    /// Retry policy built from these defaults
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            delay: self.retry_delay,
        }
    }
}

/// The full configuration document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Topology to provision
    pub topology: ClusterTopology,
    /// Cross-cluster service discovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_discovery: Option<ServiceDiscoveryConfig>,
    /// Single-cluster tests (run against the primary unless targeted)
    #[serde(default)]
    pub tests: Vec<TestConfig>,
    /// Tests fanned out across the topology
    #[serde(default)]
    pub multi_cluster_tests: Vec<MultiClusterTestConfig>,
    /// Coordinator defaults
    #[serde(default)]
    pub coordinator: CoordinatorSettings,
    /// Lifecycle timeouts
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

impl Document {
    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let doc: Document = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config_invalid_for("document", e.to_string()))?;
        doc.validate()?;
        Ok(doc)
    }

    /// Read, parse and validate a document from disk
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading configuration");
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::config_invalid_for(
                path.display().to_string(),
                format!("failed to read configuration: {e}"),
            )
        })?;
        Self::from_yaml(&yaml)
    }

    /// Validate cross-references between sections
    pub fn validate(&self) -> Result<()> {
        self.topology.validate()?;
        let members: BTreeSet<String> = self.topology.member_names().into_iter().collect();

        if let Some(sd) = &self.service_discovery {
            if sd.enabled && sd.clusters.is_empty() {
                return Err(Error::config_invalid_field(
                    &sd.mechanism,
                    "serviceDiscovery.clusters",
                    "at least one participating cluster is required when enabled",
                ));
            }
            if let Some(unknown) = sd.clusters.iter().find(|c| !members.contains(*c)) {
                return Err(Error::config_invalid_field(
                    &sd.mechanism,
                    "serviceDiscovery.clusters",
                    format!("cluster '{unknown}' is not part of topology '{}'", self.topology.name),
                ));
            }
            if let Some(selected) = &self.topology.federation.discovery {
                if selected != &sd.mechanism {
                    return Err(Error::config_invalid_field(
                        &self.topology.name,
                        "topology.federation.discovery",
                        format!(
                            "federation selects '{}' but serviceDiscovery configures '{}'",
                            selected, sd.mechanism
                        ),
                    ));
                }
            }
        }

        let mut names = BTreeSet::new();
        let all_tests = self
            .tests
            .iter()
            .chain(self.multi_cluster_tests.iter().map(|m| &m.test));
        for test in all_tests {
            if test.name.trim().is_empty() || test.test_type.trim().is_empty() {
                return Err(Error::config_invalid_for(
                    "tests",
                    "every test needs a name and a type",
                ));
            }
            if !names.insert(test.name.as_str()) {
                return Err(Error::config_invalid_field(
                    &test.name,
                    "name",
                    "test names must be unique",
                ));
            }
        }

        for mc in &self.multi_cluster_tests {
            if let Some(unknown) = mc.clusters.iter().find(|c| !members.contains(*c)) {
                return Err(Error::config_invalid_field(
                    mc.name(),
                    "clusters",
                    format!("cluster '{unknown}' is not part of the topology"),
                ));
            }
            if mc.timeout.is_zero() {
                return Err(Error::config_invalid_field(
                    mc.name(),
                    "timeout",
                    "timeout must be greater than zero",
                ));
            }
        }
        Ok(())
    }

    /// Find a single-cluster or multi-cluster test by name
    pub fn find_test(&self, name: &str) -> Option<TestRef<'_>> {
        self.tests
            .iter()
            .find(|t| t.name == name)
            .map(TestRef::Single)
            .or_else(|| {
                self.multi_cluster_tests
                    .iter()
                    .find(|t| t.name() == name)
                    .map(TestRef::Multi)
            })
    }
}

/// A test looked up by name
#[derive(Clone, Copy, Debug)]
pub enum TestRef<'a> {
    /// Single-cluster test
    Single(&'a TestConfig),
    /// Multi-cluster test
    Multi(&'a MultiClusterTestConfig),
}

/// Resolve the config path: explicit flag, then `FLEETBENCH_CONFIG`, then default
pub fn resolve_config_path(explicit: Option<&Path>) -> std::path::PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    match std::env::var(CONFIG_ENV) {
        Ok(p) if !p.is_empty() => p.into(),
        _ => DEFAULT_CONFIG_FILE.into(),
    }
}
