//! Distributed test coordinator
//!
//! Fans a test out across the clusters of a [`TestEnvironment`], retries
//! transient failures, runs cross-cluster checks once every per-cluster run
//! has settled, and merges everything into one [`MultiClusterTestResults`].
//!
//! # Execution tracking
//!
//! Every execution gets a caller-visible identifier and a state that moves
//! `queued → running → {passed|failed|error|cancelled}`. The table holding
//! these states is the only shared mutable state; its lock is never held
//! across an `.await`.
//!
//! # Cancellation
//!
//! Cancelling marks the execution cancelled and trips its token. Per-cluster
//! runs that have not been dispatched are recorded as not run, no further
//! retries or cross-cluster checks are scheduled, and executors are asked to
//! stop any run still in flight.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fleetbench_common::config::CoordinatorSettings;
use fleetbench_common::types::{
    ClusterRunOutcome, CrossClusterResult, ExecutionState, MultiClusterTestConfig,
    MultiClusterTestResults, RetryPolicy, TestConfig, TestEnvironment, TestResults, TestStatus,
};
use fleetbench_common::{Error, Result};

use crate::executor::{ExecutorRegistry, TestExecutor};

struct Execution {
    test: String,
    state: ExecutionState,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    message: Option<String>,
    token: CancellationToken,
    /// Runs currently inside an executor, by run id
    in_flight: HashMap<String, Arc<dyn TestExecutor>>,
    results: Option<MultiClusterTestResults>,
}

impl Execution {
    fn status(&self, id: &str) -> TestStatus {
        TestStatus {
            id: id.to_string(),
            state: self.state,
            started_at: self.started_at,
            finished_at: self.finished_at,
            message: self.message.clone(),
        }
    }
}

/// An accepted execution that has not started yet
///
/// Obtained from [`DistributedTestCoordinator::submit`] so the caller knows
/// the execution id before awaiting [`DistributedTestCoordinator::run`].
pub struct Submission {
    id: String,
    env: TestEnvironment,
    config: MultiClusterTestConfig,
    targets: Vec<String>,
    executor: Arc<dyn TestExecutor>,
    cross_cluster: Vec<(TestConfig, Arc<dyn TestExecutor>)>,
    token: CancellationToken,
}

impl Submission {
    /// Execution identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Clusters the test will run on
    pub fn targets(&self) -> &[String] {
        &self.targets
    }
}

/// Attempt loop parameters shared by per-cluster runs and cross-cluster checks
struct Attempts<'a> {
    execution: &'a str,
    label: &'a str,
    timeout: Duration,
    retry: &'a RetryPolicy,
}

/// Coordinates multi-cluster test executions
pub struct DistributedTestCoordinator {
    executors: ExecutorRegistry,
    settings: CoordinatorSettings,
    executions: Mutex<HashMap<String, Execution>>,
}

impl DistributedTestCoordinator {
    /// Create a coordinator
    pub fn new(executors: ExecutorRegistry, settings: CoordinatorSettings) -> Self {
        Self {
            executors,
            settings,
            executions: Mutex::new(HashMap::new()),
        }
    }

    /// Validate preconditions and register a queued execution
    ///
    /// Rejects disabled tests, tests without a matching executor, invalid
    /// executor options and environments with no resolvable target, all
    /// before anything runs.
    pub fn submit(
        &self,
        env: &TestEnvironment,
        config: &MultiClusterTestConfig,
    ) -> Result<Submission> {
        let name = config.name();
        if !config.test.enabled {
            return Err(Error::config_invalid_field(name, "enabled", "test is disabled"));
        }
        let executor = self.executors.for_test(&config.test)?;
        let cross_cluster = config
            .cross_cluster
            .iter()
            .map(|check| -> Result<_> { Ok((check.clone(), self.executors.for_test(check)?)) })
            .collect::<Result<Vec<_>>>()?;

        let targets = env.resolve(&config.clusters)?;
        if targets.is_empty() {
            return Err(Error::config_invalid_field(
                name,
                "clusters",
                "no target cluster is available in the environment",
            ));
        }

        let id = Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        self.executions.lock().insert(
            id.clone(),
            Execution {
                test: name.to_string(),
                state: ExecutionState::Queued,
                started_at: Utc::now(),
                finished_at: None,
                message: None,
                token: token.clone(),
                in_flight: HashMap::new(),
                results: None,
            },
        );
        info!(execution = %id, test = %name, targets = ?targets, "Execution queued");

        let env = TestEnvironment {
            clusters: targets
                .iter()
                .filter_map(|t| env.get(t).map(|c| (t.clone(), c.clone())))
                .collect(),
        };
        Ok(Submission {
            id,
            env,
            config: config.clone(),
            targets,
            executor,
            cross_cluster,
            token,
        })
    }

    /// Run a submitted execution to a terminal state
    ///
    /// Run failures are recorded in the returned report and its state; an
    /// `Err` means the execution could not be started at all.
    pub async fn run(&self, submission: Submission) -> Result<MultiClusterTestResults> {
        let Submission {
            id,
            env,
            config,
            targets,
            executor,
            cross_cluster,
            token,
        } = submission;
        self.transition(&id, ExecutionState::Running, None)?;

        let attempts = Attempts {
            execution: &id,
            label: config.name(),
            timeout: config.timeout,
            retry: &config.retry,
        };
        let started = Instant::now();

        let per_cluster: Vec<(String, ClusterRunOutcome)> = if config.parallel {
            join_all(targets.iter().map(|cluster| {
                self.run_on_cluster(&attempts, &token, &executor, &env, &config.test, cluster)
            }))
            .await
        } else {
            let mut outcomes = Vec::with_capacity(targets.len());
            for cluster in &targets {
                outcomes.push(
                    self.run_on_cluster(&attempts, &token, &executor, &env, &config.test, cluster)
                        .await,
                );
            }
            outcomes
        };

        let mut cross_results = Vec::new();
        for (check, check_executor) in &cross_cluster {
            if token.is_cancelled() {
                debug!(execution = %id, check = %check.name, "Skipping cross-cluster check after cancel");
                break;
            }
            let check_attempts = Attempts {
                label: &check.name,
                ..attempts
            };
            let outcome = self
                .attempt(&check_attempts, &token, check_executor, &env, check, "fleet")
                .await;
            cross_results.push(match outcome {
                Ok(results) => CrossClusterResult {
                    name: check.name.clone(),
                    clusters: targets.clone(),
                    results: Some(results),
                    error: None,
                },
                Err((e, _)) => CrossClusterResult {
                    name: check.name.clone(),
                    clusters: targets.clone(),
                    results: None,
                    error: Some(e.to_string()),
                },
            });
        }

        let mut report = MultiClusterTestResults {
            execution_id: id.clone(),
            test: config.name().to_string(),
            state: ExecutionState::Running,
            per_cluster: per_cluster.into_iter().collect::<BTreeMap<_, _>>(),
            cross_cluster: cross_results,
            overall: Default::default(),
            duration: started.elapsed(),
        };
        report.overall = report.compute_overall();

        let outcome = if token.is_cancelled() {
            ExecutionState::Cancelled
        } else if report.has_errors() {
            ExecutionState::Error
        } else if report.overall.failed > 0 {
            ExecutionState::Failed
        } else {
            ExecutionState::Passed
        };
        report.state = self.finish(&id, outcome, &report);

        info!(
            execution = %id,
            test = %report.test,
            state = %report.state,
            passed = report.overall.passed,
            failed = report.overall.failed,
            duration_ms = report.duration.as_millis() as u64,
            "Execution finished"
        );
        Ok(report)
    }

    /// Submit and run in one step
    pub async fn execute_multi_cluster_test(
        &self,
        env: &TestEnvironment,
        config: &MultiClusterTestConfig,
    ) -> Result<MultiClusterTestResults> {
        let submission = self.submit(env, config)?;
        self.run(submission).await
    }

    /// Wrap a plain test so it targets one cluster with the coordinator's defaults
    pub fn single_cluster(&self, cluster: &str, test: &TestConfig) -> MultiClusterTestConfig {
        MultiClusterTestConfig {
            test: test.clone(),
            clusters: vec![cluster.to_string()],
            parallel: false,
            timeout: self.settings.default_timeout,
            retry: self.settings.retry_policy(),
            cross_cluster: Vec::new(),
        }
    }

    /// Run a plain test on one cluster with the coordinator's default timeout and retries
    pub async fn run_single_cluster_test(
        &self,
        env: &TestEnvironment,
        cluster: &str,
        test: &TestConfig,
    ) -> Result<MultiClusterTestResults> {
        let config = self.single_cluster(cluster, test);
        self.execute_multi_cluster_test(env, &config).await
    }

    /// Cancel a running execution
    ///
    /// Unknown ids fail with `NotFound` and queued executions cannot be
    /// cancelled. Cancelling an execution that already finished changes
    /// nothing. Returns the state after the call.
    pub async fn cancel_execution(&self, id: &str) -> Result<ExecutionState> {
        let in_flight = {
            let mut executions = self.executions.lock();
            let execution = executions
                .get_mut(id)
                .ok_or_else(|| Error::not_found("execution", id))?;
            if execution.state.is_terminal() {
                return Ok(execution.state);
            }
            if !execution.state.can_transition_to(ExecutionState::Cancelled) {
                return Err(Error::internal_with_context(
                    "cancel",
                    format!("execution {id} is {} and cannot be cancelled", execution.state),
                ));
            }
            execution.state = ExecutionState::Cancelled;
            execution.finished_at = Some(Utc::now());
            execution.message = Some("cancelled by caller".to_string());
            execution.token.cancel();
            execution
                .in_flight
                .iter()
                .map(|(run, executor)| (run.clone(), executor.clone()))
                .collect::<Vec<_>>()
        };

        info!(execution = %id, in_flight = in_flight.len(), "Execution cancelled");
        for (run, executor) in in_flight {
            if let Err(e) = executor.cancel(&run).await {
                warn!(execution = %id, run = %run, error = %e, "Executor failed to cancel run");
            }
        }
        Ok(ExecutionState::Cancelled)
    }

    /// Current status of an execution
    pub fn get_execution_status(&self, id: &str) -> Result<TestStatus> {
        self.executions
            .lock()
            .get(id)
            .map(|e| e.status(id))
            .ok_or_else(|| Error::not_found("execution", id))
    }

    /// Final report of an execution, once it reached a terminal state
    pub fn get_execution_results(&self, id: &str) -> Result<Option<MultiClusterTestResults>> {
        self.executions
            .lock()
            .get(id)
            .map(|e| e.results.clone())
            .ok_or_else(|| Error::not_found("execution", id))
    }

    /// Every tracked execution, oldest first
    pub fn list_executions(&self) -> Vec<(String, TestStatus)> {
        let executions = self.executions.lock();
        let mut all: Vec<(String, TestStatus)> = executions
            .iter()
            .map(|(id, e)| (e.test.clone(), e.status(id)))
            .collect();
        all.sort_by_key(|(_, s)| s.started_at);
        all
    }

    fn transition(&self, id: &str, next: ExecutionState, message: Option<String>) -> Result<()> {
        let mut executions = self.executions.lock();
        let execution = executions
            .get_mut(id)
            .ok_or_else(|| Error::not_found("execution", id))?;
        if !execution.state.can_transition_to(next) {
            return Err(Error::internal_with_context(
                "execution",
                format!("illegal transition {} -> {next} for {id}", execution.state),
            ));
        }
        execution.state = next;
        if next.is_terminal() {
            execution.finished_at = Some(Utc::now());
            execution.message = message;
        }
        Ok(())
    }

    /// Record the final state, keeping a cancellation that raced the finish
    fn finish(
        &self,
        id: &str,
        outcome: ExecutionState,
        report: &MultiClusterTestResults,
    ) -> ExecutionState {
        let mut executions = self.executions.lock();
        let Some(execution) = executions.get_mut(id) else {
            return outcome;
        };
        if execution.state.can_transition_to(outcome) {
            execution.state = outcome;
            execution.finished_at = Some(Utc::now());
            if outcome == ExecutionState::Error {
                execution.message = Some(error_summary(report));
            }
        }
        let mut stored = report.clone();
        stored.state = execution.state;
        execution.results = Some(stored);
        let state = execution.state;
        evict_settled(&mut executions, self.settings.retained_executions.max(1));
        state
    }

    fn set_in_flight(&self, execution: &str, run: &str, executor: Option<&Arc<dyn TestExecutor>>) {
        if let Some(e) = self.executions.lock().get_mut(execution) {
            match executor {
                Some(executor) => {
                    e.in_flight.insert(run.to_string(), executor.clone());
                }
                None => {
                    e.in_flight.remove(run);
                }
            }
        }
    }

    async fn run_on_cluster(
        &self,
        attempts: &Attempts<'_>,
        token: &CancellationToken,
        executor: &Arc<dyn TestExecutor>,
        env: &TestEnvironment,
        test: &TestConfig,
        cluster: &str,
    ) -> (String, ClusterRunOutcome) {
        if token.is_cancelled() {
            return (cluster.to_string(), ClusterRunOutcome::NotRun);
        }
        let Some(cluster_env) = env.only(cluster) else {
            return (
                cluster.to_string(),
                ClusterRunOutcome::Errored {
                    error: format!("cluster {cluster} is not in the environment"),
                    attempts: 0,
                },
            );
        };

        let outcome = match self
            .attempt(attempts, token, executor, &cluster_env, test, cluster)
            .await
        {
            Ok(mut results) => {
                results.cluster = Some(cluster.to_string());
                ClusterRunOutcome::Completed { results }
            }
            Err((e, attempts)) => ClusterRunOutcome::Errored {
                error: e.to_string(),
                attempts,
            },
        };
        (cluster.to_string(), outcome)
    }

    /// Run attempts until one completes, a non-transient error occurs,
    /// retries run out or the execution is cancelled
    ///
    /// Only the final attempt's results are returned, so retries never show
    /// up in the counts.
    async fn attempt(
        &self,
        attempts: &Attempts<'_>,
        token: &CancellationToken,
        executor: &Arc<dyn TestExecutor>,
        env: &TestEnvironment,
        test: &TestConfig,
        scope: &str,
    ) -> std::result::Result<TestResults, (Error, u32)> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let run_id = format!("{}/{scope}/{attempt}", attempts.execution);
            debug!(execution = %attempts.execution, test = %attempts.label, scope, attempt, "Dispatching run");

            self.set_in_flight(attempts.execution, &run_id, Some(executor));
            let result = match tokio::time::timeout(
                attempts.timeout,
                executor.execute(&run_id, token.child_token(), env, test),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    if let Err(e) = executor.cancel(&run_id).await {
                        debug!(run = %run_id, error = %e, "Executor cancel after timeout failed");
                    }
                    Err(Error::timeout("execute", scope, attempts.timeout))
                }
            };
            self.set_in_flight(attempts.execution, &run_id, None);

            let error = match result {
                Ok(mut results) => {
                    results.attempts = attempt;
                    return Ok(results);
                }
                Err(e) => e,
            };

            if token.is_cancelled() {
                return Err((
                    Error::Cancelled {
                        execution: attempts.execution.to_string(),
                    },
                    attempt,
                ));
            }
            if !error.is_transient() || attempt > attempts.retry.max_retries {
                warn!(
                    execution = %attempts.execution,
                    test = %attempts.label,
                    scope,
                    attempt,
                    error = %error,
                    "Run failed"
                );
                return Err((error, attempt));
            }

            warn!(
                execution = %attempts.execution,
                test = %attempts.label,
                scope,
                attempt,
                error = %error,
                delay_ms = attempts.retry.delay.as_millis() as u64,
                "Transient failure, retrying"
            );
            tokio::select! {
                _ = token.cancelled() => {
                    return Err((
                        Error::Cancelled { execution: attempts.execution.to_string() },
                        attempt,
                    ));
                }
                _ = tokio::time::sleep(attempts.retry.delay) => {}
            }
        }
    }
}

/// Drop the oldest settled executions until at most `keep` remain
///
/// An execution is settled once its report is stored; a cancelled execution
/// whose runs are still unwinding is kept until `run` records the report.
fn evict_settled(executions: &mut HashMap<String, Execution>, keep: usize) {
    let mut settled: Vec<(DateTime<Utc>, String)> = executions
        .iter()
        .filter(|(_, e)| e.results.is_some())
        .map(|(id, e)| (e.finished_at.unwrap_or(e.started_at), id.clone()))
        .collect();
    if settled.len() <= keep {
        return;
    }
    settled.sort();
    let excess = settled.len() - keep;
    for (_, id) in settled.into_iter().take(excess) {
        executions.remove(&id);
        debug!(execution = %id, "Evicted settled execution");
    }
}

fn error_summary(report: &MultiClusterTestResults) -> String {
    let per_cluster = report.per_cluster.iter().filter_map(|(cluster, o)| match o {
        ClusterRunOutcome::Errored { error, .. } => Some(format!("{cluster}: {error}")),
        _ => None,
    });
    let cross = report
        .cross_cluster
        .iter()
        .filter_map(|c| c.error.as_ref().map(|e| format!("{}: {e}", c.name)));
    per_cluster.chain(cross).collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleetbench_common::types::ClusterTarget;
    use std::collections::{HashSet, VecDeque};

    const FAKE: &str = "fake";

    /// Executor replaying scripted outcomes per scope
    ///
    /// The scope is the single cluster of the environment, or `fleet` for
    /// cross-cluster checks. Unscripted attempts pass with five cases.
    /// Scopes in `block` wait for cancellation.
    #[derive(Default)]
    struct ScriptedExecutor {
        script: Mutex<HashMap<String, VecDeque<Result<TestResults>>>>,
        block: HashSet<String>,
        calls: Mutex<Vec<String>>,
        cancelled: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn scripted(mut self, scope: &str, outcomes: Vec<Result<TestResults>>) -> Self {
            self.script.get_mut().insert(scope.to_string(), outcomes.into());
            self
        }

        fn blocking(mut self, scope: &str) -> Self {
            self.block.insert(scope.to_string());
            self
        }

        fn calls_for(&self, scope: &str) -> usize {
            self.calls.lock().iter().filter(|c| *c == scope).count()
        }
    }

    #[async_trait]
    impl TestExecutor for ScriptedExecutor {
        fn test_type(&self) -> &'static str {
            FAKE
        }

        fn validate_config(&self, _config: &TestConfig) -> Result<()> {
            Ok(())
        }

        async fn execute(
            &self,
            _run_id: &str,
            cancel: CancellationToken,
            env: &TestEnvironment,
            config: &TestConfig,
        ) -> Result<TestResults> {
            let scope = match env.clusters.len() {
                1 => env.clusters.keys().next().cloned().unwrap_or_default(),
                _ => "fleet".to_string(),
            };
            self.calls.lock().push(scope.clone());
            if self.block.contains(&scope) {
                cancel.cancelled().await;
                return Err(Error::Cancelled {
                    execution: scope,
                });
            }
            let next = self.script.lock().get_mut(&scope).and_then(VecDeque::pop_front);
            next.unwrap_or_else(|| Ok(TestResults::counts(&config.name, 5, 0, 0)))
        }

        async fn cancel(&self, run_id: &str) -> Result<()> {
            self.cancelled.lock().push(run_id.to_string());
            Ok(())
        }

        async fn status(&self, run_id: &str) -> Result<TestStatus> {
            Err(Error::not_found("run", run_id))
        }
    }

    fn env() -> TestEnvironment {
        ["p1", "r1"].iter().fold(TestEnvironment::new(), |env, name| {
            env.with_cluster(ClusterTarget {
                name: name.to_string(),
                kubeconfig: String::new(),
                primary: *name == "p1",
            })
        })
    }

    fn config() -> MultiClusterTestConfig {
        let mut config = MultiClusterTestConfig::new(TestConfig::new("mesh", FAKE));
        config.retry = RetryPolicy {
            max_retries: 2,
            delay: Duration::from_millis(1),
        };
        config
    }

    fn coordinator(executor: ScriptedExecutor) -> (Arc<DistributedTestCoordinator>, Arc<ScriptedExecutor>) {
        let executor = Arc::new(executor);
        let mut registry = ExecutorRegistry::new();
        registry.register(executor.clone());
        (
            Arc::new(DistributedTestCoordinator::new(registry, CoordinatorSettings::default())),
            executor,
        )
    }

    fn transient(cluster: &str) -> Result<TestResults> {
        Err(Error::execution_transient("mesh", Some(cluster.into()), "connection refused"))
    }

    // ==========================================================================
    // Aggregation
    // ==========================================================================

    /// Story: two clusters with five passing cases each add up to ten
    #[tokio::test]
    async fn story_two_clusters_five_passed_each() {
        let (coordinator, _) = coordinator(ScriptedExecutor::default());
        let mut config = config();
        config.parallel = true;

        let report = coordinator
            .execute_multi_cluster_test(&env(), &config)
            .await
            .unwrap();
        assert_eq!(report.state, ExecutionState::Passed);
        assert_eq!(report.overall.total, 10);
        assert_eq!(report.overall.passed, 10);
        assert_eq!(report.overall.failed, 0);
        assert_eq!(report.overall.skipped, 0);
        assert_eq!(
            report.per_cluster["r1"].results().unwrap().cluster.as_deref(),
            Some("r1")
        );

        let status = coordinator.get_execution_status(&report.execution_id).unwrap();
        assert_eq!(status.state, ExecutionState::Passed);
        assert!(status.finished_at.is_some());
    }

    #[tokio::test]
    async fn cross_cluster_checks_run_against_the_fleet_and_count_once() {
        let executor = ScriptedExecutor::default()
            .scripted("fleet", vec![Ok(TestResults::counts("reachability", 1, 1, 0))]);
        let (coordinator, executor) = coordinator(executor);
        let mut config = config();
        config.cross_cluster.push(TestConfig::new("reachability", FAKE));

        let report = coordinator
            .execute_multi_cluster_test(&env(), &config)
            .await
            .unwrap();
        assert_eq!(report.cross_cluster.len(), 1);
        assert_eq!(report.cross_cluster[0].clusters, vec!["p1", "r1"]);
        assert_eq!(report.overall.total, 12);
        assert_eq!(report.overall.failed, 1);
        assert_eq!(report.state, ExecutionState::Failed);
        assert_eq!(executor.calls_for("fleet"), 1);
    }

    // ==========================================================================
    // Retries
    // ==========================================================================

    /// Story: a flaky environment is retried and the retry is invisible in the tally
    #[tokio::test]
    async fn story_transient_failure_is_retried_without_double_counting() {
        let executor = ScriptedExecutor::default().scripted(
            "r1",
            vec![transient("r1"), Ok(TestResults::counts("mesh", 3, 0, 0))],
        );
        let (coordinator, executor) = coordinator(executor);

        let report = coordinator
            .execute_multi_cluster_test(&env(), &config())
            .await
            .unwrap();
        assert_eq!(executor.calls_for("r1"), 2);
        let r1 = report.per_cluster["r1"].results().unwrap();
        assert_eq!(r1.attempts, 2);
        assert_eq!(report.overall.passed, 8);
        assert_eq!(report.overall.total, 8);
        assert_eq!(report.state, ExecutionState::Passed);
    }

    #[tokio::test]
    async fn assertion_failures_are_never_retried() {
        let executor = ScriptedExecutor::default()
            .scripted("p1", vec![Ok(TestResults::counts("mesh", 2, 3, 0))]);
        let (coordinator, executor) = coordinator(executor);

        let report = coordinator
            .execute_multi_cluster_test(&env(), &config())
            .await
            .unwrap();
        assert_eq!(executor.calls_for("p1"), 1);
        assert_eq!(report.overall.failed, 3);
        assert_eq!(report.state, ExecutionState::Failed);
    }

    #[tokio::test]
    async fn permanent_and_exhausted_errors_mark_the_execution_errored() {
        let executor = ScriptedExecutor::default()
            .scripted(
                "p1",
                vec![Err(Error::execution_permanent("mesh", None, "bad image"))],
            )
            .scripted("r1", vec![transient("r1"), transient("r1"), transient("r1")]);
        let (coordinator, executor) = coordinator(executor);

        let report = coordinator
            .execute_multi_cluster_test(&env(), &config())
            .await
            .unwrap();
        assert_eq!(executor.calls_for("p1"), 1);
        assert_eq!(executor.calls_for("r1"), 3);
        assert!(matches!(
            report.per_cluster["r1"],
            ClusterRunOutcome::Errored { attempts: 3, .. }
        ));
        assert_eq!(report.state, ExecutionState::Error);
        assert_eq!(report.overall.total, 0);

        let status = coordinator.get_execution_status(&report.execution_id).unwrap();
        assert!(status.message.unwrap().contains("bad image"));
    }

    #[tokio::test]
    async fn attempt_timeout_is_reported_and_the_run_cancelled() {
        let (coordinator, executor) = coordinator(ScriptedExecutor::default().blocking("p1"));
        let mut config = config();
        config.clusters = vec!["p1".into()];
        config.timeout = Duration::from_millis(20);
        config.retry.max_retries = 0;

        let report = coordinator
            .execute_multi_cluster_test(&env(), &config)
            .await
            .unwrap();
        match &report.per_cluster["p1"] {
            ClusterRunOutcome::Errored { error, .. } => assert!(error.contains("timed out")),
            other => panic!("expected errored outcome, got {other:?}"),
        }
        assert_eq!(executor.cancelled.lock().len(), 1);
    }

    // ==========================================================================
    // Preconditions and lookups
    // ==========================================================================

    #[tokio::test]
    async fn rejects_bad_submissions_before_running() {
        let (coordinator, executor) = coordinator(ScriptedExecutor::default());

        let mut disabled = config();
        disabled.test.enabled = false;
        assert!(matches!(
            coordinator.submit(&env(), &disabled),
            Err(Error::ConfigInvalid { .. })
        ));

        let mut unknown = config();
        unknown.clusters = vec!["r9".into()];
        assert!(matches!(
            coordinator.submit(&env(), &unknown),
            Err(Error::ConfigInvalid { .. })
        ));

        assert!(matches!(
            coordinator.submit(&TestEnvironment::new(), &config()),
            Err(Error::ConfigInvalid { .. })
        ));

        let other_type = MultiClusterTestConfig::new(TestConfig::new("mesh", "junit"));
        assert!(matches!(
            coordinator.submit(&env(), &other_type),
            Err(Error::ConfigInvalid { .. })
        ));

        assert!(executor.calls.lock().is_empty());
        assert!(coordinator.list_executions().is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let (coordinator, _) = coordinator(ScriptedExecutor::default());
        assert!(matches!(
            coordinator.get_execution_status("nope"),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            coordinator.cancel_execution("nope").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn queued_executions_cannot_be_cancelled_and_finished_ones_stay_final() {
        let (coordinator, _) = coordinator(ScriptedExecutor::default());
        let submission = coordinator.submit(&env(), &config()).unwrap();
        let id = submission.id().to_string();

        assert_eq!(
            coordinator.get_execution_status(&id).unwrap().state,
            ExecutionState::Queued
        );
        assert!(coordinator.cancel_execution(&id).await.is_err());

        let report = coordinator.run(submission).await.unwrap();
        assert_eq!(report.state, ExecutionState::Passed);
        assert_eq!(
            coordinator.cancel_execution(&id).await.unwrap(),
            ExecutionState::Passed
        );
        assert_eq!(
            coordinator.get_execution_results(&id).unwrap().unwrap().state,
            ExecutionState::Passed
        );
    }

    /// Story: a long-lived coordinator only remembers its most recent executions
    #[tokio::test]
    async fn story_oldest_settled_executions_are_evicted() {
        let executor = Arc::new(ScriptedExecutor::default());
        let mut registry = ExecutorRegistry::new();
        registry.register(executor.clone());
        let settings = CoordinatorSettings {
            retained_executions: 2,
            ..CoordinatorSettings::default()
        };
        let coordinator = DistributedTestCoordinator::new(registry, settings);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let report = coordinator.execute_multi_cluster_test(&env(), &config()).await.unwrap();
            assert_eq!(report.state, ExecutionState::Passed);
            ids.push(report.execution_id);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert!(matches!(
            coordinator.get_execution_status(&ids[0]),
            Err(Error::NotFound { .. })
        ));
        for id in &ids[1..] {
            assert_eq!(
                coordinator.get_execution_status(id).unwrap().state,
                ExecutionState::Passed
            );
        }
        assert_eq!(coordinator.list_executions().len(), 2);
    }

    #[tokio::test]
    async fn single_cluster_runs_use_coordinator_defaults() {
        let (coordinator, executor) = coordinator(ScriptedExecutor::default());
        let report = coordinator
            .run_single_cluster_test(&env(), "r1", &TestConfig::new("smoke", FAKE))
            .await
            .unwrap();
        assert_eq!(report.per_cluster.len(), 1);
        assert_eq!(report.overall.passed, 5);
        assert_eq!(*executor.calls.lock(), vec!["r1"]);
    }

    // ==========================================================================
    // Cancellation
    // ==========================================================================

    /// Story: cancelling mid-run stops dispatch to the remaining clusters
    #[tokio::test]
    async fn story_cancel_stops_further_dispatch() {
        let (coordinator, executor) = coordinator(ScriptedExecutor::default().blocking("p1"));
        let mut config = config();
        config.cross_cluster.push(TestConfig::new("reachability", FAKE));

        let submission = coordinator.submit(&env(), &config).unwrap();
        let id = submission.id().to_string();
        let runner = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run(submission).await })
        };

        while executor.calls_for("p1") == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(
            coordinator.get_execution_status(&id).unwrap().state,
            ExecutionState::Running
        );
        assert_eq!(
            coordinator.cancel_execution(&id).await.unwrap(),
            ExecutionState::Cancelled
        );

        let report = runner.await.unwrap().unwrap();
        assert_eq!(report.state, ExecutionState::Cancelled);
        assert_eq!(report.per_cluster["r1"], ClusterRunOutcome::NotRun);
        assert!(report.cross_cluster.is_empty());
        assert_eq!(*executor.calls.lock(), vec!["p1"]);
        assert_eq!(executor.cancelled.lock().len(), 1);
        assert!(executor.cancelled.lock()[0].ends_with("/p1/1"));

        assert_eq!(
            coordinator.get_execution_status(&id).unwrap().state,
            ExecutionState::Cancelled
        );
    }
}
