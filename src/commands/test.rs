//! Test command - run or validate the configured tests
//!
//! Usage: fleetbench test run [--type T] [--tags a,b] [--parallel] [--multi-cluster] [NAME...]
//!        fleetbench test validate

use std::fmt::Write as _;

use clap::{Args, Subcommand};
use tracing::{debug, info, warn};

use fleetbench_common::config::Document;
use fleetbench_common::types::{
    ClusterRunOutcome, ExecutionState, MultiClusterTestConfig, MultiClusterTestResults, TestConfig,
    TestEnvironment,
};
use fleetbench_discovery::DiscoveryRegistry;
use fleetbench_runner::{DistributedTestCoordinator, ExecutorRegistry};

use super::{topology_manager, Context};
use crate::{Error, Outcome, Result};

/// Run or validate tests
#[derive(Args, Debug)]
pub struct TestArgs {
    #[command(subcommand)]
    pub command: TestCommand,
}

#[derive(Subcommand, Debug)]
pub enum TestCommand {
    /// Run selected tests against the topology
    Run(RunArgs),
    /// Check the document, discovery options and executor options without running anything
    Validate,
}

/// Test selection and fan-out flags
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Only run tests of this executor type
    #[arg(long = "type")]
    pub test_type: Option<String>,

    /// Only run tests carrying one of these tags
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Run per-cluster tests concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Fan plain tests out to every cluster instead of only the primary
    #[arg(long)]
    pub multi_cluster: bool,

    /// Test names to run (default: every enabled test)
    pub names: Vec<String>,
}

impl RunArgs {
    fn selects(&self, test: &TestConfig) -> bool {
        if !self.names.is_empty() && !self.names.contains(&test.name) {
            return false;
        }
        if let Some(t) = &self.test_type {
            if &test.test_type != t {
                return false;
            }
        }
        test.matches_tags(&self.tags)
    }
}

/// Build the runs to submit, in document order
///
/// Plain tests target the primary unless `--multi-cluster` asks for every
/// member. Disabled tests are skipped. Naming a test that does not exist is
/// an error.
pub fn plan(
    doc: &Document,
    args: &RunArgs,
    coordinator: &DistributedTestCoordinator,
) -> Result<Vec<MultiClusterTestConfig>> {
    let unknown: Vec<&str> = args
        .names
        .iter()
        .filter(|n| {
            !doc.tests.iter().any(|t| &t.name == *n)
                && !doc.multi_cluster_tests.iter().any(|m| m.name() == n.as_str())
        })
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(Error::validation(format!("unknown test(s): {}", unknown.join(", "))));
    }

    let plain = doc.tests.iter().map(|test| {
        let mut config = coordinator.single_cluster(&doc.topology.primary.name, test);
        if args.multi_cluster {
            config.clusters.clear();
        }
        config
    });
    let runs = plain
        .chain(doc.multi_cluster_tests.iter().cloned())
        .filter(|config| {
            if !config.test.enabled {
                debug!(test = %config.name(), "Skipping disabled test");
                return false;
            }
            args.selects(&config.test)
        })
        .map(|mut config| {
            config.parallel |= args.parallel;
            config
        })
        .collect();
    Ok(runs)
}

/// Run the test command
pub async fn run(ctx: &Context, args: TestArgs) -> Result<Outcome> {
    let doc = ctx.load_document()?;
    match args.command {
        TestCommand::Run(run_args) => run_tests(ctx, &doc, &run_args).await,
        TestCommand::Validate => {
            validate(&doc)?;
            ctx.print(&doc.topology.name, |name| format!("{name}: configuration is valid"))?;
            Ok(Outcome::Success)
        }
    }
}

async fn run_tests(ctx: &Context, doc: &Document, args: &RunArgs) -> Result<Outcome> {
    let coordinator =
        DistributedTestCoordinator::new(ExecutorRegistry::with_defaults(), doc.coordinator.clone());
    let runs = plan(doc, args, &coordinator)?;
    if runs.is_empty() {
        return Err(Error::validation("no tests match the selection"));
    }

    let env = topology_manager(doc).environment(&doc.topology).await?;
    info!(tests = runs.len(), clusters = env.clusters.len(), "Running tests");

    let mut reports = Vec::with_capacity(runs.len());
    for config in &runs {
        let report = run_interruptible(&coordinator, &env, config).await?;
        let cancelled = report.state == ExecutionState::Cancelled;
        reports.push(report);
        if cancelled {
            warn!("Interrupted, skipping remaining tests");
            break;
        }
    }

    ctx.print(&reports, |r| r.iter().map(report_text).collect::<Vec<_>>().join("\n"))?;
    outcome(&reports)
}

/// Submit and run one test, cancelling it on Ctrl-C
async fn run_interruptible(
    coordinator: &DistributedTestCoordinator,
    env: &TestEnvironment,
    config: &MultiClusterTestConfig,
) -> Result<MultiClusterTestResults> {
    let submission = coordinator.submit(env, config)?;
    let id = submission.id().to_string();
    let run = coordinator.run(submission);
    tokio::pin!(run);

    let mut interrupted = false;
    loop {
        tokio::select! {
            report = &mut run => return Ok(report?),
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                warn!(execution = %id, test = %config.name(), "Interrupted, cancelling");
                if let Err(e) = coordinator.cancel_execution(&id).await {
                    warn!(execution = %id, error = %e, "Cancel failed");
                }
            }
        }
    }
}

/// Map finished reports to the process outcome
///
/// Runs that could not complete or were cancelled are errors and win over
/// plain test failures.
pub fn outcome(reports: &[MultiClusterTestResults]) -> Result<Outcome> {
    let mut problems = Vec::new();
    for report in reports {
        if report.state == ExecutionState::Cancelled {
            problems.push(format!("{}: cancelled", report.test));
        }
        for (cluster, run) in &report.per_cluster {
            if let ClusterRunOutcome::Errored { error, .. } = run {
                problems.push(format!("{}/{cluster}: {error}", report.test));
            }
        }
        for check in &report.cross_cluster {
            if let Some(error) = &check.error {
                problems.push(format!("{}/{}: {error}", report.test, check.name));
            }
        }
    }
    if !problems.is_empty() {
        return Err(Error::command_failed(problems.join("; ")));
    }
    if reports.iter().any(|r| r.overall.failed > 0) {
        return Ok(Outcome::TestsFailed);
    }
    Ok(Outcome::Success)
}

/// Human-readable summary of one execution
pub fn report_text(report: &MultiClusterTestResults) -> String {
    let o = &report.overall;
    let mut out = format!(
        "{} [{}] {}/{} passed, {} failed, {} skipped",
        report.test, report.state, o.passed, o.total, o.failed, o.skipped
    );
    for (cluster, run) in &report.per_cluster {
        let line = match run {
            ClusterRunOutcome::Completed { results } => format!(
                "{} passed, {} failed, {} skipped (attempts: {})",
                results.passed, results.failed, results.skipped, results.attempts
            ),
            ClusterRunOutcome::Errored { error, attempts } => {
                format!("error after {attempts} attempt(s): {error}")
            }
            ClusterRunOutcome::NotRun => "not run".to_string(),
        };
        let _ = write!(out, "\n  {cluster:<16}{line}");
    }
    for check in &report.cross_cluster {
        let line = match (&check.results, &check.error) {
            (Some(r), _) => format!("{} passed, {} failed", r.passed, r.failed),
            (None, Some(e)) => format!("error: {e}"),
            (None, None) => "not run".to_string(),
        };
        let _ = write!(out, "\n  {:<16}{line}", format!("* {}", check.name));
    }
    out
}

/// Check everything a run would check before dispatching
pub fn validate(doc: &Document) -> Result<()> {
    topology_manager(doc).validate_topology(&doc.topology)?;

    if let Some(sd) = &doc.service_discovery {
        DiscoveryRegistry::with_defaults()
            .get(&sd.mechanism)?
            .validate_config(sd)?;
    }

    let executors = ExecutorRegistry::with_defaults();
    let tests = doc.tests.iter().chain(
        doc.multi_cluster_tests
            .iter()
            .flat_map(|m| std::iter::once(&m.test).chain(m.cross_cluster.iter())),
    );
    for test in tests {
        executors.for_test(test)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetbench_common::config::CoordinatorSettings;
    use fleetbench_common::types::{CrossClusterResult, OverallResults, TestResults};
    use std::collections::BTreeMap;
    use std::time::Duration;

    const DOC: &str = r#"
topology:
  name: lab
  primary: { provider: kind, name: p1 }
  remotes:
    r1: { provider: kind, name: r1 }
tests:
  - name: smoke
    type: command
    tags: [fast]
    options: { command: "true" }
  - name: slow
    type: command
    tags: [slow]
    options: { command: "true" }
  - name: off
    type: command
    enabled: false
    options: { command: "true" }
multiClusterTests:
  - name: mesh
    type: command
    tags: [fast, mesh]
    clusters: [p1, r1]
    options: { command: "true" }
"#;

    fn coordinator() -> DistributedTestCoordinator {
        DistributedTestCoordinator::new(ExecutorRegistry::new(), CoordinatorSettings::default())
    }

    fn names(runs: &[MultiClusterTestConfig]) -> Vec<&str> {
        runs.iter().map(|r| r.name()).collect()
    }

    fn report(state: ExecutionState, per_cluster: Vec<(&str, ClusterRunOutcome)>) -> MultiClusterTestResults {
        let mut report = MultiClusterTestResults {
            execution_id: "e1".into(),
            test: "smoke".into(),
            state,
            per_cluster: per_cluster
                .into_iter()
                .map(|(c, o)| (c.to_string(), o))
                .collect::<BTreeMap<_, _>>(),
            cross_cluster: Vec::new(),
            overall: OverallResults::default(),
            duration: Duration::from_secs(1),
        };
        report.overall = report.compute_overall();
        report
    }

    // =========================================================================
    // Selection
    // =========================================================================

    #[test]
    fn plain_tests_target_the_primary_and_disabled_ones_are_skipped() {
        let doc = Document::from_yaml(DOC).unwrap();
        let runs = plan(&doc, &RunArgs::default(), &coordinator()).unwrap();
        assert_eq!(names(&runs), vec!["smoke", "slow", "mesh"]);
        assert_eq!(runs[0].clusters, vec!["p1"]);
        assert_eq!(runs[2].clusters, vec!["p1", "r1"]);
    }

    #[test]
    fn filters_combine() {
        let doc = Document::from_yaml(DOC).unwrap();
        let args = RunArgs {
            tags: vec!["fast".into()],
            parallel: true,
            multi_cluster: true,
            ..Default::default()
        };
        let runs = plan(&doc, &args, &coordinator()).unwrap();
        assert_eq!(names(&runs), vec!["smoke", "mesh"]);
        assert!(runs[0].clusters.is_empty(), "multi-cluster fans out to every member");
        assert!(runs.iter().all(|r| r.parallel));

        let by_name = RunArgs {
            names: vec!["slow".into()],
            ..Default::default()
        };
        assert_eq!(names(&plan(&doc, &by_name, &coordinator()).unwrap()), vec!["slow"]);

        let by_type = RunArgs {
            test_type: Some("other".into()),
            ..Default::default()
        };
        assert!(plan(&doc, &by_type, &coordinator()).unwrap().is_empty());
    }

    #[test]
    fn unknown_names_are_rejected() {
        let doc = Document::from_yaml(DOC).unwrap();
        let args = RunArgs {
            names: vec!["smoke".into(), "nope".into()],
            ..Default::default()
        };
        let err = plan(&doc, &args, &coordinator()).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    // =========================================================================
    // Outcome mapping
    // =========================================================================

    #[test]
    fn passing_reports_succeed() {
        let ok = report(
            ExecutionState::Passed,
            vec![("p1", ClusterRunOutcome::Completed { results: TestResults::counts("smoke", 5, 0, 0) })],
        );
        assert_eq!(outcome(&[ok]).unwrap(), Outcome::Success);
    }

    #[test]
    fn failed_cases_map_to_tests_failed() {
        let failed = report(
            ExecutionState::Failed,
            vec![("p1", ClusterRunOutcome::Completed { results: TestResults::counts("smoke", 4, 1, 0) })],
        );
        assert_eq!(outcome(&[failed]).unwrap(), Outcome::TestsFailed);
    }

    #[test]
    fn errors_win_over_failures() {
        let failed = report(
            ExecutionState::Failed,
            vec![("p1", ClusterRunOutcome::Completed { results: TestResults::counts("smoke", 4, 1, 0) })],
        );
        let mut errored = report(
            ExecutionState::Error,
            vec![(
                "r1",
                ClusterRunOutcome::Errored {
                    error: "kubeconfig unreadable".into(),
                    attempts: 3,
                },
            )],
        );
        errored.cross_cluster.push(CrossClusterResult {
            name: "reach".into(),
            clusters: vec!["p1".into(), "r1".into()],
            results: None,
            error: Some("timed out".into()),
        });

        let err = outcome(&[failed, errored]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("smoke/r1: kubeconfig unreadable"));
        assert!(message.contains("smoke/reach: timed out"));
    }

    #[test]
    fn report_text_shows_each_cluster() {
        let r = report(
            ExecutionState::Error,
            vec![
                ("p1", ClusterRunOutcome::Completed { results: TestResults::counts("smoke", 5, 0, 0) }),
                ("r1", ClusterRunOutcome::NotRun),
            ],
        );
        let text = report_text(&r);
        assert!(text.starts_with("smoke [error] 5/5 passed"));
        assert!(text.contains("not run"));
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn validate_checks_executor_options() {
        let doc = Document::from_yaml(DOC).unwrap();
        validate(&doc).unwrap();

        let broken = DOC.replace("options: { command: \"true\" }\nmultiClusterTests", "options: {}\nmultiClusterTests");
        let doc = Document::from_yaml(&broken).unwrap();
        assert!(validate(&doc).is_err());
    }
}
