//! Reference executor running an external program per attempt
//!
//! Each target cluster's kubeconfig is written to a private temp directory.
//! The program sees:
//! - `KUBECONFIG`: the single target, or the primary for fleet-wide runs
//! - `FLEETBENCH_CLUSTER`: name of that cluster
//! - `FLEETBENCH_CLUSTERS`: `name=path` pairs for every cluster, comma separated
//! - `FLEETBENCH_RUN_ID`: the attempt's run identifier
//!
//! A stdout line `FLEETBENCH_RESULT {"passed":N,"failed":N,"skipped":N}`
//! reports counts; without one the exit status decides between one passed
//! and one failed case.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use fleetbench_common::types::{
    ExecutionState, TestConfig, TestEnvironment, TestResults, TestStatus,
};
use fleetbench_common::{Error, Result};

use crate::executor::TestExecutor;

/// Test type identifier
pub const TEST_TYPE: &str = "command";

/// Prefix of the stdout line carrying result counts
pub const RESULT_MARKER: &str = "FLEETBENCH_RESULT";

const RECOGNIZED_OPTIONS: &[&str] = &["command", "args", "env", "workingDir"];

#[derive(Clone, Debug, PartialEq, Eq)]
struct CommandSpec {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
}

impl CommandSpec {
    fn from_config(config: &TestConfig) -> Result<Self> {
        let options = &config.options;
        let owner = config.name.as_str();
        options.ensure_recognized(owner, RECOGNIZED_OPTIONS)?;

        let program = options
            .string(owner, "command")?
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                Error::config_invalid_field(owner, "options.command", "a command is required")
            })?;

        Ok(Self {
            program,
            args: options.string_list(owner, "args")?,
            env: options.string_map(owner, "env")?,
            working_dir: options.string(owner, "workingDir")?.map(PathBuf::from),
        })
    }
}

/// Counts reported on the result line
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReportedCounts {
    passed: u32,
    failed: u32,
    skipped: u32,
    artifacts: Vec<String>,
}

/// Derive counts from process output
fn parse_results(test: &str, success: bool, stdout: &str) -> Result<TestResults> {
    let reported = stdout
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(RESULT_MARKER));

    match reported {
        Some(json) => {
            let counts: ReportedCounts = serde_json::from_str(json.trim()).map_err(|e| {
                Error::execution_permanent(test, None, format!("malformed {RESULT_MARKER} line: {e}"))
            })?;
            let mut results =
                TestResults::try_counts(test, counts.passed, counts.failed, counts.skipped)
                    .ok_or_else(|| {
                        Error::execution_permanent(
                            test,
                            None,
                            format!("{RESULT_MARKER} counts overflow the case total"),
                        )
                    })?;
            results.artifacts = counts.artifacts;
            Ok(results)
        }
        None if success => Ok(TestResults::counts(test, 1, 0, 0)),
        None => Ok(TestResults::counts(test, 0, 1, 0)),
    }
}

struct TrackedRun {
    token: CancellationToken,
    status: TestStatus,
}

/// Finished runs kept for status queries by default
pub const DEFAULT_RETAINED_RUNS: usize = 64;

/// Executor for `type: command` tests
pub struct CommandExecutor {
    runs: Mutex<HashMap<String, TrackedRun>>,
    retained: usize,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            retained: DEFAULT_RETAINED_RUNS,
        }
    }
}

impl CommandExecutor {
    /// Create an executor with no tracked runs
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retained` finished runs; older ones are forgotten
    pub fn with_retention(mut self, retained: usize) -> Self {
        self.retained = retained.max(1);
        self
    }

    fn track(&self, run_id: &str, token: CancellationToken) {
        self.runs.lock().insert(
            run_id.to_string(),
            TrackedRun {
                token,
                status: TestStatus {
                    id: run_id.to_string(),
                    state: ExecutionState::Running,
                    started_at: Utc::now(),
                    finished_at: None,
                    message: None,
                },
            },
        );
    }

    fn finish(&self, run_id: &str, outcome: &Result<TestResults>) {
        let next = match outcome {
            Ok(r) if r.has_failures() => ExecutionState::Failed,
            Ok(_) => ExecutionState::Passed,
            Err(Error::Cancelled { .. }) => ExecutionState::Cancelled,
            Err(_) => ExecutionState::Error,
        };
        let mut runs = self.runs.lock();
        if let Some(run) = runs.get_mut(run_id) {
            if run.status.state.can_transition_to(next) {
                run.status.state = next;
                run.status.finished_at = Some(Utc::now());
                run.status.message = outcome.as_ref().err().map(ToString::to_string);
            }
        }

        let mut finished: Vec<_> = runs
            .values()
            .filter_map(|r| r.status.finished_at.map(|at| (at, r.status.id.clone())))
            .collect();
        if finished.len() > self.retained {
            finished.sort();
            let excess = finished.len() - self.retained;
            for (_, id) in finished.into_iter().take(excess) {
                runs.remove(&id);
            }
        }
    }

    async fn run_process(
        &self,
        run_id: &str,
        spec: &CommandSpec,
        cancel: &CancellationToken,
        env: &TestEnvironment,
        config: &TestConfig,
        cluster: Option<String>,
    ) -> Result<TestResults> {
        let transient =
            |msg: String| Error::execution_transient(&config.name, cluster.clone(), msg);

        let dir = tempfile::tempdir()
            .map_err(|e| transient(format!("failed to create kubeconfig dir: {e}")))?;
        let mut files = Vec::with_capacity(env.clusters.len());
        for target in env.clusters.values() {
            let path = dir.path().join(format!("{}.kubeconfig", target.name));
            tokio::fs::write(&path, &target.kubeconfig)
                .await
                .map_err(|e| transient(format!("failed to write kubeconfig: {e}")))?;
            files.push((target, path));
        }
        let (main, main_path) = files
            .iter()
            .find(|(t, _)| t.primary || files.len() == 1)
            .or_else(|| files.first())
            .ok_or_else(|| {
                Error::execution_permanent(&config.name, None, "environment has no clusters")
            })?;
        let all: Vec<String> = files
            .iter()
            .map(|(t, p)| format!("{}={}", t.name, p.display()))
            .collect();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .env("KUBECONFIG", main_path)
            .env("FLEETBENCH_CLUSTER", &main.name)
            .env("FLEETBENCH_CLUSTERS", all.join(","))
            .env("FLEETBENCH_RUN_ID", run_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let started = Instant::now();
        let child = command
            .spawn()
            .map_err(|e| transient(format!("failed to start {}: {e}", spec.program)))?;
        debug!(run = %run_id, program = %spec.program, "Started test process");

        // Dropping the wait future drops the child, which kills it
        let output = tokio::select! {
            _ = cancel.cancelled() => {
                info!(run = %run_id, "Test process cancelled");
                return Err(Error::Cancelled { execution: run_id.to_string() });
            }
            output = child.wait_with_output() => {
                output.map_err(|e| transient(format!("failed waiting on {}: {e}", spec.program)))?
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut results = parse_results(&config.name, output.status.success(), &stdout)?;
        results.cluster = cluster;
        results.duration = started.elapsed();
        debug!(
            run = %run_id,
            exit = ?output.status.code(),
            passed = results.passed,
            failed = results.failed,
            "Test process finished"
        );
        Ok(results)
    }
}

#[async_trait]
impl TestExecutor for CommandExecutor {
    fn test_type(&self) -> &'static str {
        TEST_TYPE
    }

    fn validate_config(&self, config: &TestConfig) -> Result<()> {
        CommandSpec::from_config(config).map(|_| ())
    }

    async fn execute(
        &self,
        run_id: &str,
        cancel: CancellationToken,
        env: &TestEnvironment,
        config: &TestConfig,
    ) -> Result<TestResults> {
        let spec = CommandSpec::from_config(config)?;
        let cluster = match env.clusters.len() {
            1 => env.clusters.keys().next().cloned(),
            _ => None,
        };

        self.track(run_id, cancel.clone());
        let outcome = self
            .run_process(run_id, &spec, &cancel, env, config, cluster)
            .await;
        self.finish(run_id, &outcome);
        outcome
    }

    async fn cancel(&self, run_id: &str) -> Result<()> {
        let runs = self.runs.lock();
        let run = runs
            .get(run_id)
            .ok_or_else(|| Error::not_found("run", run_id))?;
        run.token.cancel();
        Ok(())
    }

    async fn status(&self, run_id: &str) -> Result<TestStatus> {
        self.runs
            .lock()
            .get(run_id)
            .map(|r| r.status.clone())
            .ok_or_else(|| Error::not_found("run", run_id))
    }
}
