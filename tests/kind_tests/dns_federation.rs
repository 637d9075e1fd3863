//! Stories about DNS federation across kind clusters
//!
//! Once clusters are up, fleetbench writes a trust ConfigMap on every member
//! and adds a forwarding stanza for the federated zones to CoreDNS.

use serde_json::json;

use fleetbench_cluster::{ClusterProviderRegistry, FederationConfigurator};
use fleetbench_common::types::{DiscoveryState, OptionBag, ServiceDiscoveryConfig};
use fleetbench_discovery::DiscoveryRegistry;

use super::helpers::{federated_topology, manager, Cleanup};

/// Story: DNS federation is configured, observed and torn down
///
/// Configuring twice leaves the same state as configuring once. Status shows
/// every member ready. Teardown removes the stanza and the trust config so a
/// later status reports discovery as not installed.
#[tokio::test]
#[ignore = "requires docker and kind - run with: cargo test --test kind -- --ignored"]
async fn story_dns_federation_round_trip() {
    let topology = federated_topology("fbe2e-dns");
    let _cleanup = Cleanup::new(&topology);
    manager()
        .create_topology(&topology)
        .await
        .expect("topology creation should succeed");

    let discovery = ServiceDiscoveryConfig::enabled("dns", topology.member_names())
        .with_options(OptionBag::new().with("nameservers", json!(["10.96.0.10"])));
    let configurator = FederationConfigurator::from_providers(
        DiscoveryRegistry::with_defaults(),
        ClusterProviderRegistry::with_defaults(),
    );

    let first = configurator
        .configure(&topology, &discovery)
        .await
        .expect("federation should configure");
    assert_eq!(first.configured.len(), 2);
    configurator
        .configure(&topology, &discovery)
        .await
        .expect("configuring again should be a no-op");

    let status = configurator.status(&topology, &discovery).await.expect("status");
    assert_eq!(status.configured.len(), 2);
    assert!(
        status.discovery.values().all(|s| s.state.is_installed()),
        "discovery: {:?}",
        status.discovery
    );

    let report = configurator
        .teardown(&topology, &discovery)
        .await
        .expect("teardown");
    assert!(report.is_clean(), "teardown report: {report:?}");

    let status = configurator.status(&topology, &discovery).await.expect("status");
    assert!(status.configured.is_empty());
    assert!(status
        .discovery
        .values()
        .all(|s| s.state == DiscoveryState::NotInstalled));

    let report = manager().delete_topology(&topology).await;
    assert!(report.is_clean());
}
