//! Error types for fleetbench
//!
//! Errors are structured with fields to aid debugging. Each variant carries the
//! identity of the failing entity (cluster name, discovery mechanism, test id)
//! so that callers can report exactly what failed without parsing messages.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// One failed member of a fan-out operation (remote creation, federation, ...)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFailure {
    /// Name of the failed entity (cluster name, mechanism, test id)
    pub entity: String,
    /// Rendered error for that entity
    pub message: String,
}

impl fmt::Display for EntityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entity, self.message)
    }
}

fn join_failures(failures: &[EntityFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Main error type for fleetbench operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Configuration rejected before any side effect
    #[error("invalid configuration for {entity}: {message}")]
    ConfigInvalid {
        /// Entity whose configuration is invalid (cluster, mechanism, test)
        entity: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "options.nameservers")
        field: Option<String>,
    },

    /// A provider failed to create a cluster
    #[error("failed to create cluster {cluster} [{provider}]: {message}")]
    ClusterCreateFailed {
        /// Name of the cluster
        cluster: String,
        /// Provider identifier (kind, minikube)
        provider: String,
        /// Description of what failed
        message: String,
        /// Whether a later attempt may succeed
        retryable: bool,
    },

    /// A provider failed to delete a cluster
    #[error("failed to delete cluster {cluster} [{provider}]: {message}")]
    ClusterDeleteFailed {
        /// Name of the cluster
        cluster: String,
        /// Provider identifier
        provider: String,
        /// Description of what failed
        message: String,
    },

    /// The provider does not know the cluster
    #[error("cluster {cluster} not found [{provider}]")]
    ClusterNotFound {
        /// Name of the cluster
        cluster: String,
        /// Provider identifier
        provider: String,
    },

    /// The cluster exists but did not report healthy
    #[error("cluster {cluster} is unhealthy: {message}")]
    ClusterUnhealthy {
        /// Name of the cluster
        cluster: String,
        /// Description of the unhealthy aspect
        message: String,
    },

    /// A discovery mechanism could not be installed
    #[error("failed to install {mechanism} discovery on {cluster}: {message}")]
    DiscoveryInstallFailed {
        /// Discovery mechanism identifier
        mechanism: String,
        /// Target cluster
        cluster: String,
        /// Description of what failed
        message: String,
    },

    /// No discovery provider is registered for a mechanism
    #[error("service discovery mechanism {mechanism} not found")]
    DiscoveryNotFound {
        /// Discovery mechanism identifier
        mechanism: String,
    },

    /// A test run could not be executed (environment/infrastructure failure)
    #[error("test {test} failed to execute{}: {message}", cluster.as_ref().map(|c| format!(" on {c}")).unwrap_or_default())]
    TestExecutionFailed {
        /// Test identifier
        test: String,
        /// Target cluster, if the run was cluster-scoped
        cluster: Option<String>,
        /// Description of what failed
        message: String,
        /// Transient failures are eligible for retry
        transient: bool,
    },

    /// An operation exceeded its deadline
    #[error("{operation} timed out after {}s for {entity}", after.as_secs())]
    Timeout {
        /// Operation that timed out (create, health-wait, execute, ...)
        operation: String,
        /// Entity the operation targeted
        entity: String,
        /// Deadline that was exceeded
        after: Duration,
    },

    /// An execution was cancelled by the caller
    #[error("execution {execution} was cancelled")]
    Cancelled {
        /// Execution identifier
        execution: String,
    },

    /// Lookup of a registered entity failed (provider, executor, execution)
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of entity looked up
        kind: String,
        /// Identifier that was not found
        name: String,
    },

    /// Several independent units of work failed
    #[error("{operation} failed for {} member(s): {}", failures.len(), join_failures(failures))]
    Aggregate {
        /// Operation that was fanned out
        operation: String,
        /// Every failure, one per entity
        failures: Vec<EntityFailure>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a configuration error without entity context
    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            entity: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error for a named entity
    pub fn config_invalid_for(entity: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            entity: entity.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error for a named entity and field path
    pub fn config_invalid_field(
        entity: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::ConfigInvalid {
            entity: entity.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a retryable cluster creation error
    pub fn create_failed(
        cluster: impl Into<String>,
        provider: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::ClusterCreateFailed {
            cluster: cluster.into(),
            provider: provider.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable cluster creation error (e.g., already exists)
    pub fn create_failed_permanent(
        cluster: impl Into<String>,
        provider: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::ClusterCreateFailed {
            cluster: cluster.into(),
            provider: provider.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a cluster deletion error
    pub fn delete_failed(
        cluster: impl Into<String>,
        provider: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::ClusterDeleteFailed {
            cluster: cluster.into(),
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create a cluster-not-found error
    pub fn cluster_not_found(cluster: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::ClusterNotFound {
            cluster: cluster.into(),
            provider: provider.into(),
        }
    }

    /// Create an unhealthy-cluster error
    pub fn unhealthy(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ClusterUnhealthy {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a discovery installation error
    pub fn discovery_install(
        mechanism: impl Into<String>,
        cluster: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::DiscoveryInstallFailed {
            mechanism: mechanism.into(),
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a transient test execution error (eligible for retry)
    pub fn execution_transient(
        test: impl Into<String>,
        cluster: Option<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::TestExecutionFailed {
            test: test.into(),
            cluster,
            message: msg.into(),
            transient: true,
        }
    }

    /// Create a permanent test execution error
    pub fn execution_permanent(
        test: impl Into<String>,
        cluster: Option<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::TestExecutionFailed {
            test: test.into(),
            cluster,
            message: msg.into(),
            transient: false,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, entity: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            entity: entity.into(),
            after,
        }
    }

    /// Create a lookup error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an aggregate error from per-entity failures
    pub fn aggregate(operation: impl Into<String>, failures: Vec<EntityFailure>) -> Self {
        Self::Aggregate {
            operation: operation.into(),
            failures,
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Configuration and lookup errors require a fix and are never retryable.
    /// Kubernetes errors are retryable unless the API server rejected the
    /// request with a 4xx status.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::ConfigInvalid { .. } => false,
            Error::ClusterCreateFailed { retryable, .. } => *retryable,
            Error::ClusterDeleteFailed { .. } => true,
            Error::ClusterNotFound { .. } => false,
            Error::ClusterUnhealthy { .. } => true,
            Error::DiscoveryInstallFailed { .. } => true,
            Error::DiscoveryNotFound { .. } => false,
            Error::TestExecutionFailed { transient, .. } => *transient,
            Error::Timeout { .. } => true,
            Error::Cancelled { .. } => false,
            Error::NotFound { .. } => false,
            Error::Aggregate { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => false,
        }
    }

    /// Whether a test attempt that failed with this error may be run again
    ///
    /// Narrower than [`Error::is_retryable`]: only execution-environment
    /// failures flagged transient and attempt timeouts qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TestExecutionFailed { transient, .. } => *transient,
            Error::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Get the cluster name if this error is associated with a specific cluster
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Error::ClusterCreateFailed { cluster, .. }
            | Error::ClusterDeleteFailed { cluster, .. }
            | Error::ClusterNotFound { cluster, .. }
            | Error::ClusterUnhealthy { cluster, .. }
            | Error::DiscoveryInstallFailed { cluster, .. } => Some(cluster),
            Error::TestExecutionFailed { cluster, .. } => cluster.as_deref(),
            _ => None,
        }
    }

    /// Names of every failed entity when this is an aggregate error
    pub fn failed_entities(&self) -> Vec<&str> {
        match self {
            Error::Aggregate { failures, .. } => {
                failures.iter().map(|f| f.entity.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
