//! Test execution for fleetbench
//!
//! - [`executor`] - the [`TestExecutor`] boundary and registry
//! - [`command`] - reference executor running an external program
//! - [`coordinator`] - multi-cluster fan-out, retries, cancellation and aggregation

pub mod command;
pub mod coordinator;
pub mod executor;

pub use command::CommandExecutor;
pub use coordinator::{DistributedTestCoordinator, Submission};
pub use executor::{ExecutorRegistry, TestExecutor};

// Re-export common error types
pub use fleetbench_common::{Error, Result};
