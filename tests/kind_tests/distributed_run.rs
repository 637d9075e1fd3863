//! Stories about fanning tests out over a live topology

use serde_json::json;

use fleetbench_common::config::CoordinatorSettings;
use fleetbench_common::types::{
    ClusterRunOutcome, ExecutionState, MultiClusterTestConfig, OptionBag, TestConfig,
};
use fleetbench_runner::{DistributedTestCoordinator, ExecutorRegistry};

use super::helpers::{manager, two_cluster_topology, Cleanup};

/// Story: A command test runs once per member with that member's kubeconfig
///
/// The command asks each cluster for its nodes through `KUBECONFIG` and
/// reports five passing cases. Results from both members merge into ten
/// passed cases, and the execution stays queryable afterwards.
#[tokio::test]
#[ignore = "requires docker and kind - run with: cargo test --test kind -- --ignored"]
async fn story_command_test_runs_on_every_member() {
    let topology = two_cluster_topology("fbe2e-run");
    let _cleanup = Cleanup::new(&topology);
    let manager = manager();
    manager
        .create_topology(&topology)
        .await
        .expect("topology creation should succeed");
    let env = manager.environment(&topology).await.expect("environment");
    assert_eq!(env.clusters.len(), 2);

    let script = r#"kubectl get nodes >/dev/null && echo 'FLEETBENCH_RESULT {"passed":5,"failed":0,"skipped":0}'"#;
    let test = TestConfig::new("nodes", "command").with_options(
        OptionBag::new()
            .with("command", json!("sh"))
            .with("args", json!(["-c", script])),
    );
    let mut config = MultiClusterTestConfig::new(test);
    config.parallel = true;

    let coordinator =
        DistributedTestCoordinator::new(ExecutorRegistry::with_defaults(), CoordinatorSettings::default());
    let report = coordinator
        .execute_multi_cluster_test(&env, &config)
        .await
        .expect("execution should start");

    assert_eq!(report.state, ExecutionState::Passed, "report: {report:?}");
    assert_eq!(report.overall.passed, 10);
    assert!(report
        .per_cluster
        .values()
        .all(|o| matches!(o, ClusterRunOutcome::Completed { .. })));

    let status = coordinator
        .get_execution_status(&report.execution_id)
        .expect("execution should be tracked");
    assert_eq!(status.state, ExecutionState::Passed);

    let report = manager.delete_topology(&topology).await;
    assert!(report.is_clean());
}
