//! DNS-based discovery through CoreDNS
//!
//! Federated zones (default `global`) are forwarded to the configured
//! nameservers by a stanza fleetbench owns inside the cluster's Corefile.
//! CoreDNS is restarted after every edit so the change takes effect without
//! relying on the `reload` plugin.

use async_trait::async_trait;
use tracing::{debug, info};

use fleetbench_common::types::{
    DiscoveryState, HealthCheck, ServiceDiscoveryConfig, ServiceDiscoveryStatus,
};
use fleetbench_common::{Error, Result};

use crate::cluster_api::ClusterApi;
use crate::corefile::{self, Stanza};
use crate::{validate_common, ServiceDiscoveryProvider};

/// Mechanism identifier
pub const MECHANISM: &str = "dns";

const COREDNS_NAMESPACE: &str = "kube-system";
const COREDNS_CONFIG_MAP: &str = "coredns";
const COREDNS_DEPLOYMENT: &str = "coredns";
const COREDNS_SERVICE: &str = "kube-dns";
const COREFILE_KEY: &str = "Corefile";

const DEFAULT_DOMAIN: &str = "global";
const DEFAULT_CACHE_SECONDS: u32 = 30;

const RECOGNIZED_OPTIONS: &[&str] = &["nameservers", "domains", "cacheSeconds", "namespaces"];

/// Typed view of the DNS option bag
#[derive(Clone, Debug, PartialEq, Eq)]
struct DnsSettings {
    stanza: Stanza,
    namespaces: Vec<String>,
}

impl DnsSettings {
    fn from_config(config: &ServiceDiscoveryConfig) -> Result<Self> {
        let options = &config.options;
        options.ensure_recognized(MECHANISM, RECOGNIZED_OPTIONS)?;

        let nameservers = options.string_list(MECHANISM, "nameservers")?;
        if nameservers.is_empty() {
            return Err(Error::config_invalid_field(
                MECHANISM,
                "options.nameservers",
                "at least one nameserver is required",
            ));
        }
        if nameservers.iter().any(|n| n.trim().is_empty()) {
            return Err(Error::config_invalid_field(
                MECHANISM,
                "options.nameservers",
                "nameserver entries must not be blank",
            ));
        }

        let mut domains = options.string_list(MECHANISM, "domains")?;
        if domains.is_empty() {
            domains.push(DEFAULT_DOMAIN.to_string());
        }
        if let Some(bad) = domains.iter().find(|d| !is_valid_zone(d)) {
            return Err(Error::config_invalid_field(
                MECHANISM,
                "options.domains",
                format!("'{bad}' is not a valid DNS zone"),
            ));
        }

        let cache_seconds = options
            .u32(MECHANISM, "cacheSeconds")?
            .unwrap_or(DEFAULT_CACHE_SECONDS);

        Ok(Self {
            stanza: Stanza {
                domains,
                nameservers,
                cache_seconds,
            },
            namespaces: options.string_list(MECHANISM, "namespaces")?,
        })
    }
}

fn is_valid_zone(zone: &str) -> bool {
    !zone.is_empty()
        && zone.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// DNS discovery provider
#[derive(Clone, Copy, Debug, Default)]
pub struct DnsDiscovery;

impl DnsDiscovery {
    async fn read_corefile(&self, cluster: &dyn ClusterApi) -> Result<Option<String>> {
        let data = cluster
            .get_config_map(COREDNS_NAMESPACE, COREDNS_CONFIG_MAP)
            .await?;
        Ok(data.and_then(|mut d| d.remove(COREFILE_KEY)))
    }

    async fn write_corefile(&self, cluster: &dyn ClusterApi, corefile: String) -> Result<()> {
        let mut data = cluster
            .get_config_map(COREDNS_NAMESPACE, COREDNS_CONFIG_MAP)
            .await?
            .unwrap_or_default();
        data.insert(COREFILE_KEY.to_string(), corefile);
        cluster
            .apply_config_map(COREDNS_NAMESPACE, COREDNS_CONFIG_MAP, data)
            .await?;
        cluster
            .restart_deployment(COREDNS_NAMESPACE, COREDNS_DEPLOYMENT)
            .await
    }

    async fn count_services(&self, cluster: &dyn ClusterApi, namespaces: &[String]) -> Result<u32> {
        let mut total = 0u32;
        for ns in namespaces {
            total += cluster.list_services(ns, None).await?.len() as u32;
        }
        Ok(total)
    }
}

#[async_trait]
impl ServiceDiscoveryProvider for DnsDiscovery {
    fn mechanism(&self) -> &str {
        MECHANISM
    }

    fn validate_config(&self, config: &ServiceDiscoveryConfig) -> Result<()> {
        if validate_common(MECHANISM, config)? {
            DnsSettings::from_config(config)?;
        }
        Ok(())
    }

    async fn install(&self, cluster: &dyn ClusterApi, config: &ServiceDiscoveryConfig) -> Result<()> {
        let settings = DnsSettings::from_config(config)?;
        let name = cluster.cluster_name();

        let current = self.read_corefile(cluster).await?.ok_or_else(|| {
            Error::discovery_install(MECHANISM, name, "CoreDNS Corefile not found in kube-system/coredns")
        })?;
        let updated = corefile::upsert(&current, &settings.stanza)
            .map_err(|e| Error::discovery_install(MECHANISM, name, e.to_string()))?;

        if updated == current {
            debug!(cluster = %name, "Federation stanza already up to date");
            return Ok(());
        }
        self.write_corefile(cluster, updated)
            .await
            .map_err(|e| Error::discovery_install(MECHANISM, name, e.to_string()))?;
        info!(
            cluster = %name,
            domains = ?settings.stanza.domains,
            nameservers = ?settings.stanza.nameservers,
            "Installed DNS federation stanza"
        );
        Ok(())
    }

    async fn uninstall(&self, cluster: &dyn ClusterApi, _config: &ServiceDiscoveryConfig) -> Result<()> {
        let name = cluster.cluster_name();
        let Some(current) = self.read_corefile(cluster).await? else {
            return Ok(());
        };
        // Malformed markers leave the Corefile untouched
        let cleaned = corefile::remove(&current)?;
        if cleaned == current {
            return Ok(());
        }
        self.write_corefile(cluster, cleaned).await?;
        info!(cluster = %name, "Removed DNS federation stanza");
        Ok(())
    }

    async fn status(
        &self,
        cluster: &dyn ClusterApi,
        config: &ServiceDiscoveryConfig,
    ) -> Result<ServiceDiscoveryStatus> {
        let Some(current) = self.read_corefile(cluster).await? else {
            return Ok(ServiceDiscoveryStatus::errored(
                MECHANISM,
                "CoreDNS Corefile not found",
            ));
        };
        match corefile::contains_stanza(&current) {
            Ok(false) => return Ok(ServiceDiscoveryStatus::not_installed(MECHANISM)),
            Ok(true) => {}
            Err(e) => return Ok(ServiceDiscoveryStatus::errored(MECHANISM, e.to_string())),
        }

        let namespaces = DnsSettings::from_config(config)
            .map(|s| s.namespaces)
            .unwrap_or_default();
        let ready = cluster
            .deployment_ready(COREDNS_NAMESPACE, COREDNS_DEPLOYMENT)
            .await?
            .unwrap_or(false);
        let endpoints = cluster
            .endpoint_count(COREDNS_NAMESPACE, COREDNS_SERVICE)
            .await?;
        let services = self.count_services(cluster, &namespaces).await?;

        let mut status =
            ServiceDiscoveryStatus::observed(MECHANISM, ready && endpoints > 0, services, endpoints);
        if !ready {
            status.state = DiscoveryState::Installing;
        }
        Ok(status)
    }

    async fn health_check(
        &self,
        cluster: &dyn ClusterApi,
        _config: &ServiceDiscoveryConfig,
    ) -> Result<Vec<HealthCheck>> {
        let mut checks = Vec::with_capacity(3);

        checks.push(
            match cluster
                .deployment_ready(COREDNS_NAMESPACE, COREDNS_DEPLOYMENT)
                .await
            {
                Ok(Some(true)) => HealthCheck::pass("coredns-deployment", "CoreDNS is available"),
                Ok(Some(false)) => {
                    HealthCheck::fail("coredns-deployment", "CoreDNS is not available")
                }
                Ok(None) => HealthCheck::fail("coredns-deployment", "CoreDNS deployment not found"),
                Err(e) => HealthCheck::fail("coredns-deployment", e.to_string()),
            },
        );

        checks.push(match self.read_corefile(cluster).await {
            Ok(Some(current)) => match corefile::contains_stanza(&current) {
                Ok(true) => HealthCheck::pass("federation-stanza", "federation stanza present"),
                Ok(false) => HealthCheck::fail("federation-stanza", "federation stanza missing"),
                Err(e) => HealthCheck::fail("federation-stanza", e.to_string()),
            },
            Ok(None) => HealthCheck::fail("federation-stanza", "Corefile not found"),
            Err(e) => HealthCheck::fail("federation-stanza", e.to_string()),
        });

        checks.push(
            match cluster
                .endpoint_count(COREDNS_NAMESPACE, COREDNS_SERVICE)
                .await
            {
                Ok(0) => HealthCheck::fail("dns-endpoints", "kube-dns has no ready endpoints"),
                Ok(n) => HealthCheck::pass("dns-endpoints", format!("{n} ready endpoint(s)")),
                Err(e) => HealthCheck::fail("dns-endpoints", e.to_string()),
            },
        );

        Ok(checks)
    }
}
