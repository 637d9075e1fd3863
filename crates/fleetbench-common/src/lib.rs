//! Common types for fleetbench: data model, errors, configuration and utilities

#![deny(missing_docs)]

pub mod config;
pub mod duration;
pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod types;

pub use error::{EntityFailure, Error};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace for fleetbench-managed resources on member clusters
pub const FLEETBENCH_NAMESPACE: &str = "fleetbench-system";

/// Label key marking resources managed by fleetbench
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label value for resources managed by fleetbench
pub const LABEL_MANAGED_BY_FLEETBENCH: &str = "fleetbench";

/// Label selector matching every fleetbench-managed resource
pub const MANAGED_LABEL_SELECTOR: &str = "app.kubernetes.io/managed-by=fleetbench";
