//! Test configuration, execution environment and result types

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::OptionBag;
use crate::duration::human;
use crate::{Error, Result};

/// Default per-attempt timeout for multi-cluster runs
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default delay between retries of a transient failure
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// A single test to run, interpreted by the executor matching `test_type`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConfig {
    /// Test name, unique within a configuration document
    pub name: String,
    /// Executor identifier (e.g. "command")
    #[serde(rename = "type")]
    pub test_type: String,
    /// Executor-specific options
    #[serde(default, skip_serializing_if = "OptionBag::is_empty")]
    pub options: OptionBag,
    /// Disabled tests are skipped by the runner
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Free-form tags used for selection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl TestConfig {
    /// Create an enabled test with no options
    pub fn new(name: impl Into<String>, test_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            test_type: test_type.into(),
            options: OptionBag::new(),
            enabled: true,
            tags: Vec::new(),
        }
    }

    /// Set the option bag
    pub fn with_options(mut self, options: OptionBag) -> Self {
        self.options = options;
        self
    }

    /// Whether the test carries any of `tags` (an empty filter matches everything)
    pub fn matches_tags(&self, tags: &[String]) -> bool {
        tags.is_empty() || tags.iter().any(|t| self.tags.contains(t))
    }
}

/// Retry behaviour for transient execution failures
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt
    #[serde(default)]
    pub max_retries: u32,
    /// Fixed delay between attempts
    #[serde(default = "default_retry_delay", with = "human")]
    pub delay: Duration,
}

fn default_retry_delay() -> Duration {
    DEFAULT_RETRY_DELAY
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// A test fanned out across several clusters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiClusterTestConfig {
    /// The per-cluster test
    #[serde(flatten)]
    pub test: TestConfig,
    /// Target clusters; empty means every cluster in the environment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<String>,
    /// Run per-cluster tests concurrently
    #[serde(default)]
    pub parallel: bool,
    /// Per-attempt timeout
    #[serde(default = "default_test_timeout", with = "human")]
    pub timeout: Duration,
    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Checks run against the whole fleet after per-cluster runs settle
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cross_cluster: Vec<TestConfig>,
}

fn default_test_timeout() -> Duration {
    DEFAULT_TEST_TIMEOUT
}

impl MultiClusterTestConfig {
    /// Wrap a test with default fan-out settings
    pub fn new(test: TestConfig) -> Self {
        Self {
            test,
            clusters: Vec::new(),
            parallel: false,
            timeout: DEFAULT_TEST_TIMEOUT,
            retry: RetryPolicy::default(),
            cross_cluster: Vec::new(),
        }
    }

    /// Test name
    pub fn name(&self) -> &str {
        &self.test.name
    }
}

/// Connection details for one member cluster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTarget {
    /// Cluster name
    pub name: String,
    /// Kubeconfig document for the cluster
    pub kubeconfig: String,
    /// Whether this is the topology's primary
    pub primary: bool,
}

/// Clusters a test may run against, keyed by name
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestEnvironment {
    /// Member clusters
    pub clusters: BTreeMap<String, ClusterTarget>,
}

impl TestEnvironment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cluster
    pub fn with_cluster(mut self, target: ClusterTarget) -> Self {
        self.clusters.insert(target.name.clone(), target);
        self
    }

    /// Look up a cluster
    pub fn get(&self, name: &str) -> Option<&ClusterTarget> {
        self.clusters.get(name)
    }

    /// Environment narrowed to a single cluster
    pub fn only(&self, name: &str) -> Option<TestEnvironment> {
        self.get(name).map(|t| TestEnvironment::new().with_cluster(t.clone()))
    }

    /// Resolve requested cluster names; an empty request selects every cluster
    pub fn resolve(&self, requested: &[String]) -> Result<Vec<String>> {
        if requested.is_empty() {
            return Ok(self.clusters.keys().cloned().collect());
        }
        let unknown: Vec<&str> = requested
            .iter()
            .filter(|n| !self.clusters.contains_key(n.as_str()))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(Error::config_invalid_field(
                "environment",
                "clusters",
                format!("unknown cluster(s): {}", unknown.join(", ")),
            ));
        }
        Ok(requested.to_vec())
    }
}

/// Counts and artifacts of one test run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResults {
    /// Test name
    pub test: String,
    /// Cluster the run targeted, if cluster-scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    /// Total test cases
    pub total: u32,
    /// Passed cases
    pub passed: u32,
    /// Failed cases
    pub failed: u32,
    /// Skipped cases
    pub skipped: u32,
    /// Wall-clock duration of the final attempt
    #[serde(with = "human")]
    pub duration: Duration,
    /// Artifact references (paths, URLs)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    /// Attempts made; informational only
    #[serde(default)]
    pub attempts: u32,
}

impl TestResults {
    /// Results with the given counts; total is the sum of the parts
    ///
    /// Returns `None` when the total does not fit in a `u32`.
    pub fn try_counts(
        test: impl Into<String>,
        passed: u32,
        failed: u32,
        skipped: u32,
    ) -> Option<Self> {
        let total = passed.checked_add(failed)?.checked_add(skipped)?;
        Some(Self {
            total,
            ..Self::counts(test, passed, failed, skipped)
        })
    }

    /// Results with small, known counts; the total saturates at `u32::MAX`
    pub fn counts(test: impl Into<String>, passed: u32, failed: u32, skipped: u32) -> Self {
        Self {
            test: test.into(),
            total: passed.saturating_add(failed).saturating_add(skipped),
            passed,
            failed,
            skipped,
            attempts: 1,
            ..Default::default()
        }
    }

    /// Whether any case failed
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Status of an execution tracked by an executor or the coordinator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    /// Accepted, not yet dispatched
    Queued,
    /// Dispatched
    Running,
    /// Finished with zero failures
    Passed,
    /// Finished with at least one failed case
    Failed,
    /// Could not complete (environment/infrastructure failure)
    Error,
    /// Cancelled by the caller while running
    Cancelled,
}

impl ExecutionState {
    /// Terminal states never change again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Passed
                | ExecutionState::Failed
                | ExecutionState::Error
                | ExecutionState::Cancelled
        )
    }

    /// Whether `self → next` is a legal transition
    ///
    /// `queued → running → {passed|failed|error|cancelled}`.
    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (Queued, Running) | (Running, Passed) | (Running, Failed) | (Running, Error) | (Running, Cancelled)
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionState::Queued => "queued",
            ExecutionState::Running => "running",
            ExecutionState::Passed => "passed",
            ExecutionState::Failed => "failed",
            ExecutionState::Error => "error",
            ExecutionState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Status snapshot returned by executors and the coordinator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStatus {
    /// Execution identifier
    pub id: String,
    /// Current state
    pub state: ExecutionState,
    /// When the execution was accepted
    pub started_at: DateTime<Utc>,
    /// When it reached a terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Error text for error/cancelled states
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of the per-cluster run on one cluster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum ClusterRunOutcome {
    /// The run completed and produced results
    Completed {
        /// Results of the final attempt
        results: TestResults,
    },
    /// The run could not complete
    Errored {
        /// Rendered error
        error: String,
        /// Attempts made
        attempts: u32,
    },
    /// The run was never dispatched because the execution was cancelled
    NotRun,
}

impl ClusterRunOutcome {
    /// Results, when the run completed
    pub fn results(&self) -> Option<&TestResults> {
        match self {
            ClusterRunOutcome::Completed { results } => Some(results),
            _ => None,
        }
    }
}

/// Result of one cross-cluster check
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossClusterResult {
    /// Check name
    pub name: String,
    /// Clusters the check ran against
    pub clusters: Vec<String>,
    /// Results, when the check completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<TestResults>,
    /// Error, when it could not complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Element-wise sum over every per-cluster and cross-cluster result
///
/// Counts are widened to `u64` so summing any number of `u32` parts is exact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverallResults {
    /// Total cases
    pub total: u64,
    /// Passed cases
    pub passed: u64,
    /// Failed cases
    pub failed: u64,
    /// Skipped cases
    pub skipped: u64,
}

impl OverallResults {
    /// Sum counts over the given results
    pub fn sum<'a>(results: impl IntoIterator<Item = &'a TestResults>) -> Self {
        results.into_iter().fold(Self::default(), |acc, r| Self {
            total: acc.total + u64::from(r.total),
            passed: acc.passed + u64::from(r.passed),
            failed: acc.failed + u64::from(r.failed),
            skipped: acc.skipped + u64::from(r.skipped),
        })
    }
}

/// Merged report of a multi-cluster execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiClusterTestResults {
    /// Caller-visible execution identifier
    pub execution_id: String,
    /// Test name
    pub test: String,
    /// Terminal state
    pub state: ExecutionState,
    /// Outcome per target cluster
    pub per_cluster: BTreeMap<String, ClusterRunOutcome>,
    /// Cross-cluster check results
    #[serde(default)]
    pub cross_cluster: Vec<CrossClusterResult>,
    /// Roll-up; always recomputed from the parts
    pub overall: OverallResults,
    /// Wall-clock span from first dispatch to last completion
    #[serde(with = "human")]
    pub duration: Duration,
}

impl MultiClusterTestResults {
    /// Recompute `overall` from per-cluster and cross-cluster results
    pub fn compute_overall(&self) -> OverallResults {
        let per_cluster = self.per_cluster.values().filter_map(ClusterRunOutcome::results);
        let cross = self.cross_cluster.iter().filter_map(|c| c.results.as_ref());
        OverallResults::sum(per_cluster.chain(cross))
    }

    /// Whether any run or check could not complete
    pub fn has_errors(&self) -> bool {
        self.per_cluster
            .values()
            .any(|o| matches!(o, ClusterRunOutcome::Errored { .. }))
            || self.cross_cluster.iter().any(|c| c.error.is_some())
    }
}
