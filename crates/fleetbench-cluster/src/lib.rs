//! Cluster lifecycle for fleetbench
//!
//! - [`provider`] - kind and minikube backends behind [`ClusterProvider`]
//! - [`topology`] - primary/remote creation, teardown and status
//! - [`federation`] - trust config and discovery installation across members

pub mod federation;
pub mod provider;
pub mod topology;

pub use federation::{ClusterConnector, FederationConfigurator, ProviderConnector};
pub use provider::{ClusterProvider, ClusterProviderRegistry};
pub use topology::{DeleteReport, TopologyManager};

// Re-export common error types
pub use fleetbench_common::{Error, Result};
