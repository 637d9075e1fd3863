//! Manual discovery: static service entries
//!
//! The entries are written verbatim to a ConfigMap that workloads (or a
//! sidecar) read to resolve peer services.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::info;

use fleetbench_common::types::{HealthCheck, ServiceDiscoveryConfig, ServiceDiscoveryStatus};
use fleetbench_common::{Error, Result, FLEETBENCH_NAMESPACE};

use crate::cluster_api::ClusterApi;
use crate::{validate_common, ServiceDiscoveryProvider};

/// Mechanism identifier
pub const MECHANISM: &str = "manual";

/// ConfigMap holding the entries
pub const ENTRIES_CONFIG_MAP: &str = "fleetbench-discovery-entries";

fn entries(config: &ServiceDiscoveryConfig) -> Result<BTreeMap<String, String>> {
    let options = &config.options;
    options.ensure_recognized(MECHANISM, &["entries"])?;
    let entries = options.string_map(MECHANISM, "entries")?;
    if entries.is_empty() {
        return Err(Error::config_invalid_field(
            MECHANISM,
            "options.entries",
            "at least one entry is required",
        ));
    }
    if let Some((name, _)) = entries.iter().find(|(_, addr)| addr.trim().is_empty()) {
        return Err(Error::config_invalid_field(
            MECHANISM,
            format!("options.entries.{name}"),
            "address must not be empty",
        ));
    }
    Ok(entries)
}

/// Static entries provider
#[derive(Clone, Copy, Debug, Default)]
pub struct ManualDiscovery;

#[async_trait]
impl ServiceDiscoveryProvider for ManualDiscovery {
    fn mechanism(&self) -> &str {
        MECHANISM
    }

    fn validate_config(&self, config: &ServiceDiscoveryConfig) -> Result<()> {
        if validate_common(MECHANISM, config)? {
            entries(config)?;
        }
        Ok(())
    }

    async fn install(&self, cluster: &dyn ClusterApi, config: &ServiceDiscoveryConfig) -> Result<()> {
        let entries = entries(config)?;
        let name = cluster.cluster_name();
        let count = entries.len();
        async {
            cluster.ensure_namespace(FLEETBENCH_NAMESPACE).await?;
            cluster
                .apply_config_map(FLEETBENCH_NAMESPACE, ENTRIES_CONFIG_MAP, entries)
                .await
        }
        .await
        .map_err(|e| Error::discovery_install(MECHANISM, name, e.to_string()))?;
        info!(cluster = %name, entries = count, "Recorded manual discovery entries");
        Ok(())
    }

    async fn uninstall(&self, cluster: &dyn ClusterApi, _config: &ServiceDiscoveryConfig) -> Result<()> {
        cluster
            .delete_config_map(FLEETBENCH_NAMESPACE, ENTRIES_CONFIG_MAP)
            .await
    }

    async fn status(
        &self,
        cluster: &dyn ClusterApi,
        config: &ServiceDiscoveryConfig,
    ) -> Result<ServiceDiscoveryStatus> {
        let expected = entries(config)?;
        match cluster
            .get_config_map(FLEETBENCH_NAMESPACE, ENTRIES_CONFIG_MAP)
            .await?
        {
            None => Ok(ServiceDiscoveryStatus::not_installed(MECHANISM)),
            Some(recorded) => {
                let n = recorded.len() as u32;
                Ok(ServiceDiscoveryStatus::observed(MECHANISM, recorded == expected, n, n))
            }
        }
    }

    async fn health_check(
        &self,
        cluster: &dyn ClusterApi,
        config: &ServiceDiscoveryConfig,
    ) -> Result<Vec<HealthCheck>> {
        let expected = entries(config)?;
        let check = match cluster
            .get_config_map(FLEETBENCH_NAMESPACE, ENTRIES_CONFIG_MAP)
            .await
        {
            Ok(Some(recorded)) if recorded == expected => HealthCheck::pass(
                "entries-configmap",
                format!("{} entries recorded", recorded.len()),
            ),
            Ok(Some(_)) => HealthCheck::fail(
                "entries-configmap",
                "recorded entries differ from configuration",
            ),
            Ok(None) => HealthCheck::fail("entries-configmap", "entries ConfigMap not found"),
            Err(e) => HealthCheck::fail("entries-configmap", e.to_string()),
        };
        Ok(vec![check])
    }
}
