//! Service discovery configuration and observed state

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::OptionBag;

/// Per-mechanism discovery settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDiscoveryConfig {
    /// Mechanism identifier (dns, aggregation, propagation, manual)
    pub mechanism: String,
    /// Whether discovery should be installed
    #[serde(default)]
    pub enabled: bool,
    /// Participating cluster names
    #[serde(default)]
    pub clusters: Vec<String>,
    /// Mechanism-specific options (nameservers, namespace filters, ...)
    #[serde(default, skip_serializing_if = "OptionBag::is_empty")]
    pub options: OptionBag,
}

impl ServiceDiscoveryConfig {
    /// Create an enabled config for the given mechanism and clusters
    pub fn enabled(mechanism: impl Into<String>, clusters: Vec<String>) -> Self {
        Self {
            mechanism: mechanism.into(),
            enabled: true,
            clusters,
            options: OptionBag::new(),
        }
    }

    /// Create a disabled config
    pub fn disabled(mechanism: impl Into<String>) -> Self {
        Self {
            mechanism: mechanism.into(),
            enabled: false,
            clusters: Vec::new(),
            options: OptionBag::new(),
        }
    }

    /// Set the option bag
    pub fn with_options(mut self, options: OptionBag) -> Self {
        self.options = options;
        self
    }
}

/// Lifecycle state of a discovery mechanism on one cluster
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiscoveryState {
    /// Nothing installed
    #[default]
    NotInstalled,
    /// Installed, waiting for readiness
    Installing,
    /// Installed and serving
    Ready,
    /// Installed but some checks fail
    Degraded,
    /// Status could not be determined
    Error,
}

impl DiscoveryState {
    /// Whether resources for the mechanism exist on the cluster
    pub fn is_installed(self) -> bool {
        matches!(
            self,
            DiscoveryState::Installing | DiscoveryState::Ready | DiscoveryState::Degraded
        )
    }
}

impl fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiscoveryState::NotInstalled => "not-installed",
            DiscoveryState::Installing => "installing",
            DiscoveryState::Ready => "ready",
            DiscoveryState::Degraded => "degraded",
            DiscoveryState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Observed discovery state on one cluster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDiscoveryStatus {
    /// Mechanism identifier
    pub mechanism: String,
    /// Lifecycle state
    pub state: DiscoveryState,
    /// Whether the mechanism is serving
    pub healthy: bool,
    /// Services made visible by the mechanism
    pub services: u32,
    /// Endpoints backing those services
    pub endpoints: u32,
    /// When the status was checked
    pub last_checked: DateTime<Utc>,
    /// Error text, when status could not be determined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceDiscoveryStatus {
    /// Status for a mechanism with nothing installed
    pub fn not_installed(mechanism: impl Into<String>) -> Self {
        Self {
            mechanism: mechanism.into(),
            state: DiscoveryState::NotInstalled,
            healthy: false,
            services: 0,
            endpoints: 0,
            last_checked: Utc::now(),
            error: None,
        }
    }

    /// Status derived from readiness and counts
    pub fn observed(mechanism: impl Into<String>, ready: bool, services: u32, endpoints: u32) -> Self {
        Self {
            mechanism: mechanism.into(),
            state: if ready {
                DiscoveryState::Ready
            } else {
                DiscoveryState::Degraded
            },
            healthy: ready,
            services,
            endpoints,
            last_checked: Utc::now(),
            error: None,
        }
    }

    /// Status for a mechanism whose state could not be read
    pub fn errored(mechanism: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            mechanism: mechanism.into(),
            state: DiscoveryState::Error,
            healthy: false,
            services: 0,
            endpoints: 0,
            last_checked: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// One independent, named health check
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Check name (e.g. "coredns-deployment")
    pub name: String,
    /// Whether the check passed
    pub healthy: bool,
    /// Human-readable detail
    pub message: String,
}

impl HealthCheck {
    /// Passing check
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: true,
            message: message.into(),
        }
    }

    /// Failing check
    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: false,
            message: message.into(),
        }
    }
}
