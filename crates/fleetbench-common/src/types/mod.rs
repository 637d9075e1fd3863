//! Data model shared by the topology manager, discovery subsystem and coordinator
//!
//! - [`cluster`] - cluster intent and observed status
//! - [`topology`] - primary/remote topology, federation and network config
//! - [`discovery`] - service discovery config, status and health checks
//! - [`testing`] - test configs, environments and aggregated results
//! - [`options`] - provider-owned option bags

pub mod cluster;
pub mod discovery;
pub mod options;
pub mod testing;
pub mod topology;

pub use cluster::{validate_cluster_name, ClusterConfig, ClusterState, ClusterStatus};
pub use discovery::{DiscoveryState, HealthCheck, ServiceDiscoveryConfig, ServiceDiscoveryStatus};
pub use options::OptionBag;
pub use testing::{
    ClusterRunOutcome, ClusterTarget, CrossClusterResult, ExecutionState, MultiClusterTestConfig,
    MultiClusterTestResults, OverallResults, RetryPolicy, TestConfig, TestEnvironment,
    TestResults, TestStatus,
};
pub use topology::{
    ClusterTopology, FederationConfig, FederationStatus, GatewayMode, NetworkConfig,
    NetworkStatus, TopologyStatus,
};
