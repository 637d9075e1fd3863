//! Discovery by propagating service exports
//!
//! Every Service in the configured namespaces that matches the optional label
//! selector gets a Multi-Cluster Services `ServiceExport`. An MCS controller
//! running in the fleet then imports the exported services on the peers.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use fleetbench_common::types::{HealthCheck, ServiceDiscoveryConfig, ServiceDiscoveryStatus};
use fleetbench_common::{Error, Result, MANAGED_LABEL_SELECTOR};

use crate::cluster_api::{managed_metadata, ClusterApi, ObjectRef};
use crate::{validate_common, ServiceDiscoveryProvider};

/// Mechanism identifier
pub const MECHANISM: &str = "propagation";

const API_VERSION: &str = "multicluster.x-k8s.io/v1alpha1";
const KIND: &str = "ServiceExport";

const RECOGNIZED_OPTIONS: &[&str] = &["namespaces", "labelSelector"];

#[derive(Clone, Debug, PartialEq, Eq)]
struct PropagationSettings {
    namespaces: Vec<String>,
    label_selector: Option<String>,
}

impl PropagationSettings {
    fn from_config(config: &ServiceDiscoveryConfig) -> Result<Self> {
        let options = &config.options;
        options.ensure_recognized(MECHANISM, RECOGNIZED_OPTIONS)?;

        let namespaces: Vec<String> = options
            .string_list(MECHANISM, "namespaces")?
            .into_iter()
            .filter(|ns| !ns.trim().is_empty())
            .collect();
        if namespaces.is_empty() {
            return Err(Error::config_invalid_field(
                MECHANISM,
                "options.namespaces",
                "at least one namespace to export from is required",
            ));
        }

        Ok(Self {
            namespaces,
            label_selector: options
                .string(MECHANISM, "labelSelector")?
                .filter(|s| !s.trim().is_empty()),
        })
    }
}

fn export_manifest(namespace: &str, service: &str) -> Value {
    json!({
        "apiVersion": API_VERSION,
        "kind": KIND,
        "metadata": managed_metadata(service, Some(namespace)),
    })
}

/// (namespace, name) of an export manifest
fn export_key(export: &Value) -> Option<(String, String)> {
    let ns = export.pointer("/metadata/namespace")?.as_str()?;
    let name = export.pointer("/metadata/name")?.as_str()?;
    Some((ns.to_string(), name.to_string()))
}

/// Service export provider
#[derive(Clone, Copy, Debug, Default)]
pub struct PropagationDiscovery;

impl PropagationDiscovery {
    async fn selected_services(
        &self,
        cluster: &dyn ClusterApi,
        settings: &PropagationSettings,
    ) -> Result<BTreeSet<(String, String)>> {
        let mut selected = BTreeSet::new();
        for ns in &settings.namespaces {
            for svc in cluster
                .list_services(ns, settings.label_selector.as_deref())
                .await?
            {
                selected.insert((ns.clone(), svc));
            }
        }
        Ok(selected)
    }

    async fn managed_exports(
        &self,
        cluster: &dyn ClusterApi,
        namespaces: Option<&[String]>,
    ) -> Result<BTreeSet<(String, String)>> {
        let exports = cluster
            .list_objects(API_VERSION, KIND, None, MANAGED_LABEL_SELECTOR)
            .await?;
        Ok(exports
            .iter()
            .filter_map(export_key)
            .filter(|(ns, _)| namespaces.map_or(true, |allowed| allowed.contains(ns)))
            .collect())
    }
}

#[async_trait]
impl ServiceDiscoveryProvider for PropagationDiscovery {
    fn mechanism(&self) -> &str {
        MECHANISM
    }

    fn validate_config(&self, config: &ServiceDiscoveryConfig) -> Result<()> {
        if validate_common(MECHANISM, config)? {
            PropagationSettings::from_config(config)?;
        }
        Ok(())
    }

    async fn install(&self, cluster: &dyn ClusterApi, config: &ServiceDiscoveryConfig) -> Result<()> {
        let settings = PropagationSettings::from_config(config)?;
        let name = cluster.cluster_name();
        let install_err = |e: Error| Error::discovery_install(MECHANISM, name, e.to_string());

        let selected = self
            .selected_services(cluster, &settings)
            .await
            .map_err(install_err)?;
        for (ns, svc) in &selected {
            cluster
                .apply_object(&export_manifest(ns, svc))
                .await
                .map_err(install_err)?;
        }

        // Exports for services that no longer match the selection
        let stale: Vec<_> = self
            .managed_exports(cluster, Some(&settings.namespaces))
            .await
            .map_err(install_err)?
            .difference(&selected)
            .cloned()
            .collect();
        for (ns, svc) in &stale {
            debug!(cluster = %name, namespace = %ns, service = %svc, "Removing stale ServiceExport");
            cluster
                .delete_object(&ObjectRef::namespaced(API_VERSION, KIND, ns, svc))
                .await
                .map_err(install_err)?;
        }

        info!(
            cluster = %name,
            exported = selected.len(),
            pruned = stale.len(),
            "Propagated service exports"
        );
        Ok(())
    }

    async fn uninstall(&self, cluster: &dyn ClusterApi, _config: &ServiceDiscoveryConfig) -> Result<()> {
        let exports = self.managed_exports(cluster, None).await?;
        for (ns, svc) in &exports {
            cluster
                .delete_object(&ObjectRef::namespaced(API_VERSION, KIND, ns, svc))
                .await?;
        }
        info!(cluster = %cluster.cluster_name(), removed = exports.len(), "Removed service exports");
        Ok(())
    }

    async fn status(
        &self,
        cluster: &dyn ClusterApi,
        config: &ServiceDiscoveryConfig,
    ) -> Result<ServiceDiscoveryStatus> {
        let settings = PropagationSettings::from_config(config)?;
        let exports = self
            .managed_exports(cluster, Some(&settings.namespaces))
            .await?;
        if exports.is_empty() {
            return Ok(ServiceDiscoveryStatus::not_installed(MECHANISM));
        }

        let mut endpoints = 0;
        let mut all_backed = true;
        for (ns, svc) in &exports {
            let n = cluster.endpoint_count(ns, svc).await?;
            all_backed &= n > 0;
            endpoints += n;
        }
        Ok(ServiceDiscoveryStatus::observed(
            MECHANISM,
            all_backed,
            exports.len() as u32,
            endpoints,
        ))
    }

    async fn health_check(
        &self,
        cluster: &dyn ClusterApi,
        config: &ServiceDiscoveryConfig,
    ) -> Result<Vec<HealthCheck>> {
        let settings = PropagationSettings::from_config(config)?;

        let (selected, exports) = match (
            self.selected_services(cluster, &settings).await,
            self.managed_exports(cluster, Some(&settings.namespaces)).await,
        ) {
            (Ok(s), Ok(e)) => (s, e),
            (Err(e), _) | (_, Err(e)) => {
                return Ok(vec![
                    HealthCheck::fail("service-exports", e.to_string()),
                    HealthCheck::fail("endpoints", e.to_string()),
                ])
            }
        };

        let missing: Vec<String> = selected
            .difference(&exports)
            .map(|(ns, svc)| format!("{ns}/{svc}"))
            .collect();
        let exports_check = if missing.is_empty() {
            HealthCheck::pass(
                "service-exports",
                format!("{} service(s) exported", exports.len()),
            )
        } else {
            HealthCheck::fail(
                "service-exports",
                format!("not exported: {}", missing.join(", ")),
            )
        };

        let mut unbacked = Vec::new();
        for (ns, svc) in &exports {
            match cluster.endpoint_count(ns, svc).await {
                Ok(0) => unbacked.push(format!("{ns}/{svc}")),
                Ok(_) => {}
                Err(e) => unbacked.push(format!("{ns}/{svc} ({e})")),
            }
        }
        let endpoints_check = if unbacked.is_empty() {
            HealthCheck::pass("endpoints", "every exported service has ready endpoints")
        } else {
            HealthCheck::fail(
                "endpoints",
                format!("no ready endpoints: {}", unbacked.join(", ")),
            )
        };

        Ok(vec![exports_check, endpoints_check])
    }
}
