//! Stories about the lifecycle of a multi-cluster topology
//!
//! A platform engineer declares a primary and a remote, asks fleetbench to
//! bring them up, checks their health and tears everything down again.

use fleetbench_common::types::ClusterState;

use super::helpers::{manager, two_cluster_topology, Cleanup};

/// Story: A fresh topology comes up healthy and goes away completely
///
/// The primary is created first, then the remote. Once both report ready
/// nodes the status view is healthy with no missing members. Deleting the
/// topology removes every member, after which the provider no longer lists
/// them and status reports them missing.
#[tokio::test]
#[ignore = "requires docker and kind - run with: cargo test --test kind -- --ignored"]
async fn story_topology_create_status_delete() {
    let topology = two_cluster_topology("fbe2e-life");
    let _cleanup = Cleanup::new(&topology);
    let manager = manager();

    manager.validate_topology(&topology).expect("topology should be valid");
    manager
        .create_topology(&topology)
        .await
        .expect("topology creation should succeed");

    let status = manager.get_topology_status(&topology).await;
    assert!(status.healthy, "status: {status:?}");
    assert!(status.missing.is_empty());
    let primary = status.primary.as_ref().expect("primary should be observed");
    assert_eq!(primary.state, ClusterState::Running);
    assert!(primary.ready_nodes >= 1);
    assert_eq!(status.network.connected.len(), 2);

    let listed = manager.list_clusters("kind").await.expect("kind list");
    assert!(listed.contains(&"fbe2e-life-p1".to_string()));
    assert!(listed.contains(&"fbe2e-life-r1".to_string()));

    let report = manager.delete_topology(&topology).await;
    assert!(report.is_clean(), "delete report: {report:?}");
    assert_eq!(report.deleted.len(), 2);

    let status = manager.get_topology_status(&topology).await;
    assert!(!status.healthy);
    assert_eq!(status.missing.len(), 2);
}

/// Story: Deleting a topology that was never created is harmless
///
/// Provider deletes are idempotent, so tearing down an absent topology
/// reports every member as deleted without failures.
#[tokio::test]
#[ignore = "requires docker and kind - run with: cargo test --test kind -- --ignored"]
async fn story_deleting_an_absent_topology_succeeds() {
    let topology = two_cluster_topology("fbe2e-absent");
    let report = manager().delete_topology(&topology).await;
    assert!(report.is_clean(), "delete report: {report:?}");
}
