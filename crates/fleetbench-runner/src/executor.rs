//! Test executor boundary
//!
//! An executor knows how to run one type of test against a
//! [`TestEnvironment`]. The coordinator hands each attempt a run identifier
//! and a cancellation token; executors track their own runs under that
//! identifier so they can be cancelled or inspected while in flight.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
use mockall::automock;

use fleetbench_common::types::{TestConfig, TestEnvironment, TestResults, TestStatus};
use fleetbench_common::{Error, Result};

use crate::command::CommandExecutor;

/// Runs tests of one type
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TestExecutor: Send + Sync {
    /// Test type identifier used in `TestConfig::test_type`
    fn test_type(&self) -> &'static str;

    /// Validate executor options before anything runs
    fn validate_config(&self, config: &TestConfig) -> Result<()>;

    /// Run one attempt
    ///
    /// Assertion failures are reported through the returned counts. An `Err`
    /// means the attempt could not complete; transient errors are eligible
    /// for retry by the caller.
    async fn execute(
        &self,
        run_id: &str,
        cancel: CancellationToken,
        env: &TestEnvironment,
        config: &TestConfig,
    ) -> Result<TestResults>;

    /// Stop an in-flight run
    async fn cancel(&self, run_id: &str) -> Result<()>;

    /// Status of a run started by this executor
    async fn status(&self, run_id: &str) -> Result<TestStatus>;
}

/// Test executors keyed by test type
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn TestExecutor>>,
}

impl ExecutorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `command` executor
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CommandExecutor::new()));
        registry
    }

    /// Register an executor under its test type, replacing any previous one
    pub fn register(&mut self, executor: Arc<dyn TestExecutor>) {
        self.executors.insert(executor.test_type().to_string(), executor);
    }

    /// Look up an executor
    pub fn get(&self, test_type: &str) -> Result<Arc<dyn TestExecutor>> {
        self.executors
            .get(test_type)
            .cloned()
            .ok_or_else(|| Error::not_found("test executor", test_type))
    }

    /// Look up the executor for a test and validate the test against it
    pub fn for_test(&self, config: &TestConfig) -> Result<Arc<dyn TestExecutor>> {
        let executor = self.get(&config.test_type).map_err(|_| {
            Error::config_invalid_field(
                &config.name,
                "type",
                format!("no executor for test type '{}'", config.test_type),
            )
        })?;
        executor.validate_config(config)?;
        Ok(executor)
    }

    /// Registered test types, sorted
    pub fn test_types(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_register_command() {
        let registry = ExecutorRegistry::with_defaults();
        assert_eq!(registry.test_types(), vec!["command"]);
        assert!(matches!(registry.get("junit"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn for_test_validates_options() {
        let mut mock = MockTestExecutor::new();
        mock.expect_test_type().return_const("fake");
        mock.expect_validate_config()
            .returning(|c| Err(Error::config_invalid_for(&c.name, "missing options")));
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(mock));

        let err = registry.for_test(&TestConfig::new("smoke", "fake")).err().unwrap();
        assert!(err.to_string().contains("missing options"));

        let err = registry.for_test(&TestConfig::new("smoke", "junit")).err().unwrap();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
        assert!(err.to_string().contains("junit"));
    }
}
