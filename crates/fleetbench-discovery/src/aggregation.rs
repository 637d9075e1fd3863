//! Discovery through API server aggregation
//!
//! Registers an `APIService` so a group/version served by a Service is
//! reachable through each member's API server.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use fleetbench_common::types::{HealthCheck, ServiceDiscoveryConfig, ServiceDiscoveryStatus};
use fleetbench_common::{Error, Result, FLEETBENCH_NAMESPACE};

use crate::cluster_api::{managed_metadata, ClusterApi, ObjectRef};
use crate::{validate_common, ServiceDiscoveryProvider};

/// Mechanism identifier
pub const MECHANISM: &str = "aggregation";

const API_VERSION: &str = "apiregistration.k8s.io/v1";
const KIND: &str = "APIService";

const DEFAULT_VERSION: &str = "v1";
const DEFAULT_GROUP_PRIORITY_MINIMUM: u32 = 1000;
const DEFAULT_VERSION_PRIORITY: u32 = 15;

const RECOGNIZED_OPTIONS: &[&str] = &[
    "group",
    "version",
    "serviceName",
    "serviceNamespace",
    "caBundle",
    "insecureSkipTlsVerify",
    "groupPriorityMinimum",
    "versionPriority",
];

#[derive(Clone, Debug, PartialEq, Eq)]
struct AggregationSettings {
    group: String,
    version: String,
    service_name: String,
    service_namespace: String,
    ca_bundle: Option<String>,
    insecure_skip_tls_verify: bool,
    group_priority_minimum: u32,
    version_priority: u32,
}

impl AggregationSettings {
    fn from_config(config: &ServiceDiscoveryConfig) -> Result<Self> {
        let options = &config.options;
        options.ensure_recognized(MECHANISM, RECOGNIZED_OPTIONS)?;

        let required = |key: &str| -> Result<String> {
            options
                .string(MECHANISM, key)?
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    Error::config_invalid_field(
                        MECHANISM,
                        format!("options.{key}"),
                        "value is required",
                    )
                })
        };

        let group = required("group")?;
        if !group.contains('.') {
            return Err(Error::config_invalid_field(
                MECHANISM,
                "options.group",
                format!("'{group}' must be a fully qualified API group"),
            ));
        }
        let service_name = required("serviceName")?;

        let ca_bundle = options.string(MECHANISM, "caBundle")?;
        let insecure_skip_tls_verify = options
            .bool(MECHANISM, "insecureSkipTlsVerify")?
            .unwrap_or(false);
        match (&ca_bundle, insecure_skip_tls_verify) {
            (None, false) => {
                return Err(Error::config_invalid_field(
                    MECHANISM,
                    "options.caBundle",
                    "a caBundle is required unless insecureSkipTlsVerify is set",
                ))
            }
            (Some(_), true) => {
                return Err(Error::config_invalid_field(
                    MECHANISM,
                    "options.insecureSkipTlsVerify",
                    "caBundle and insecureSkipTlsVerify are mutually exclusive",
                ))
            }
            _ => {}
        }

        Ok(Self {
            group,
            version: options
                .string(MECHANISM, "version")?
                .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            service_name,
            service_namespace: options
                .string(MECHANISM, "serviceNamespace")?
                .unwrap_or_else(|| FLEETBENCH_NAMESPACE.to_string()),
            ca_bundle,
            insecure_skip_tls_verify,
            group_priority_minimum: options
                .u32(MECHANISM, "groupPriorityMinimum")?
                .unwrap_or(DEFAULT_GROUP_PRIORITY_MINIMUM),
            version_priority: options
                .u32(MECHANISM, "versionPriority")?
                .unwrap_or(DEFAULT_VERSION_PRIORITY),
        })
    }

    fn object_name(&self) -> String {
        format!("{}.{}", self.version, self.group)
    }

    fn object_ref(&self) -> ObjectRef {
        ObjectRef::cluster_scoped(API_VERSION, KIND, self.object_name())
    }

    fn manifest(&self) -> Value {
        let mut spec = json!({
            "group": self.group,
            "version": self.version,
            "service": {
                "name": self.service_name,
                "namespace": self.service_namespace,
                "port": 443,
            },
            "groupPriorityMinimum": self.group_priority_minimum,
            "versionPriority": self.version_priority,
        });
        if let Some(ca) = &self.ca_bundle {
            spec["caBundle"] = json!(ca);
        }
        if self.insecure_skip_tls_verify {
            spec["insecureSkipTLSVerify"] = json!(true);
        }
        json!({
            "apiVersion": API_VERSION,
            "kind": KIND,
            "metadata": managed_metadata(&self.object_name(), None),
            "spec": spec,
        })
    }
}

fn is_available(apiservice: &Value) -> bool {
    apiservice
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .is_some_and(|conds| {
            conds.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some("Available")
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        })
}

/// API server aggregation provider
#[derive(Clone, Copy, Debug, Default)]
pub struct AggregationDiscovery;

#[async_trait]
impl ServiceDiscoveryProvider for AggregationDiscovery {
    fn mechanism(&self) -> &str {
        MECHANISM
    }

    fn validate_config(&self, config: &ServiceDiscoveryConfig) -> Result<()> {
        if validate_common(MECHANISM, config)? {
            AggregationSettings::from_config(config)?;
        }
        Ok(())
    }

    async fn install(&self, cluster: &dyn ClusterApi, config: &ServiceDiscoveryConfig) -> Result<()> {
        let settings = AggregationSettings::from_config(config)?;
        let name = cluster.cluster_name();
        cluster
            .apply_object(&settings.manifest())
            .await
            .map_err(|e| Error::discovery_install(MECHANISM, name, e.to_string()))?;
        info!(cluster = %name, apiservice = %settings.object_name(), "Registered APIService");
        Ok(())
    }

    async fn uninstall(&self, cluster: &dyn ClusterApi, config: &ServiceDiscoveryConfig) -> Result<()> {
        let settings = AggregationSettings::from_config(config)?;
        cluster.delete_object(&settings.object_ref()).await?;
        info!(cluster = %cluster.cluster_name(), apiservice = %settings.object_name(), "Removed APIService");
        Ok(())
    }

    async fn status(
        &self,
        cluster: &dyn ClusterApi,
        config: &ServiceDiscoveryConfig,
    ) -> Result<ServiceDiscoveryStatus> {
        let settings = AggregationSettings::from_config(config)?;
        let Some(apiservice) = cluster.get_object(&settings.object_ref()).await? else {
            return Ok(ServiceDiscoveryStatus::not_installed(MECHANISM));
        };
        let endpoints = cluster
            .endpoint_count(&settings.service_namespace, &settings.service_name)
            .await?;
        Ok(ServiceDiscoveryStatus::observed(
            MECHANISM,
            is_available(&apiservice),
            1,
            endpoints,
        ))
    }

    async fn health_check(
        &self,
        cluster: &dyn ClusterApi,
        config: &ServiceDiscoveryConfig,
    ) -> Result<Vec<HealthCheck>> {
        let settings = AggregationSettings::from_config(config)?;
        let object_name = settings.object_name();
        let mut checks = Vec::with_capacity(3);

        match cluster.get_object(&settings.object_ref()).await {
            Ok(Some(apiservice)) => {
                checks.push(HealthCheck::pass(
                    "apiservice-present",
                    format!("{object_name} registered"),
                ));
                checks.push(if is_available(&apiservice) {
                    HealthCheck::pass("apiservice-available", format!("{object_name} is available"))
                } else {
                    HealthCheck::fail(
                        "apiservice-available",
                        format!("{object_name} is not available"),
                    )
                });
            }
            Ok(None) => {
                checks.push(HealthCheck::fail(
                    "apiservice-present",
                    format!("{object_name} not registered"),
                ));
                checks.push(HealthCheck::fail("apiservice-available", "not registered"));
            }
            Err(e) => {
                checks.push(HealthCheck::fail("apiservice-present", e.to_string()));
                checks.push(HealthCheck::fail("apiservice-available", e.to_string()));
            }
        }

        let service = format!("{}/{}", settings.service_namespace, settings.service_name);
        checks.push(
            match cluster
                .endpoint_count(&settings.service_namespace, &settings.service_name)
                .await
            {
                Ok(0) => HealthCheck::fail("backing-service", format!("{service} has no ready endpoints")),
                Ok(n) => HealthCheck::pass("backing-service", format!("{service} has {n} endpoint(s)")),
                Err(e) => HealthCheck::fail("backing-service", e.to_string()),
            },
        );
        Ok(checks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryCluster;
    use fleetbench_common::types::{DiscoveryState, OptionBag};

    fn options() -> OptionBag {
        OptionBag::new()
            .with("group", "metrics.fleetbench.dev")
            .with("serviceName", "federation-api")
            .with("insecureSkipTlsVerify", true)
    }

    fn config(options: OptionBag) -> ServiceDiscoveryConfig {
        ServiceDiscoveryConfig::enabled(MECHANISM, vec!["p1".into()]).with_options(options)
    }

    #[test]
    fn group_and_service_are_required() {
        let mut bag = options();
        bag.insert("group", "");
        assert!(AggregationDiscovery.validate_config(&config(bag)).is_err());

        let bag = OptionBag::new()
            .with("group", "metrics.fleetbench.dev")
            .with("insecureSkipTlsVerify", true);
        let err = AggregationDiscovery.validate_config(&config(bag)).unwrap_err();
        assert!(err.to_string().contains("required"));
    }

    #[test]
    fn tls_settings_must_be_unambiguous() {
        let bag = OptionBag::new()
            .with("group", "metrics.fleetbench.dev")
            .with("serviceName", "federation-api");
        assert!(AggregationDiscovery.validate_config(&config(bag)).is_err());

        let bag = options().with("caBundle", "Zm9v");
        assert!(AggregationDiscovery.validate_config(&config(bag)).is_err());
    }

    #[test]
    fn manifest_carries_defaults() {
        let settings = AggregationSettings::from_config(&config(options())).unwrap();
        let manifest = settings.manifest();
        assert_eq!(manifest["metadata"]["name"], "v1.metrics.fleetbench.dev");
        assert_eq!(manifest["spec"]["service"]["namespace"], FLEETBENCH_NAMESPACE);
        assert_eq!(manifest["spec"]["groupPriorityMinimum"], 1000);
        assert_eq!(manifest["spec"]["insecureSkipTLSVerify"], true);
        assert!(manifest["spec"].get("caBundle").is_none());
    }

    /// Story: the APIService reports available only once the aggregator marks it so
    #[tokio::test]
    async fn story_register_and_observe_apiservice() {
        let cluster = InMemoryCluster::new("p1");
        cluster.add_service(FLEETBENCH_NAMESPACE, "federation-api", &[], 2);
        let config = config(options());

        let status = AggregationDiscovery.status(&cluster, &config).await.unwrap();
        assert_eq!(status.state, DiscoveryState::NotInstalled);

        AggregationDiscovery.install(&cluster, &config).await.unwrap();
        let status = AggregationDiscovery.status(&cluster, &config).await.unwrap();
        assert_eq!(status.state, DiscoveryState::Degraded);

        let mut available = AggregationSettings::from_config(&config).unwrap().manifest();
        available["status"] = json!({"conditions": [{"type": "Available", "status": "True"}]});
        cluster.put_object(available);

        let status = AggregationDiscovery.status(&cluster, &config).await.unwrap();
        assert_eq!(status.state, DiscoveryState::Ready);
        assert_eq!(status.endpoints, 2);

        let checks = AggregationDiscovery.health_check(&cluster, &config).await.unwrap();
        assert!(checks.iter().all(|c| c.healthy), "{checks:?}");

        AggregationDiscovery.uninstall(&cluster, &config).await.unwrap();
        assert_eq!(cluster.object_count(KIND), 0);
        let checks = AggregationDiscovery.health_check(&cluster, &config).await.unwrap();
        assert!(!checks[0].healthy);
    }
}
