//! Shared Kubernetes utilities using kube-rs
//!
//! Cluster providers hand out kubeconfig documents; everything that talks to
//! a member cluster builds its client through [`client_from_kubeconfig`] so
//! timeouts are applied uniformly.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tracing::trace;

use crate::Error;

/// Default connection timeout for member-cluster clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for member-cluster clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

const STATUS_TRUE: &str = "True";
/// Condition type reported by ready nodes
pub const CONDITION_READY: &str = "Ready";
/// Condition type reported by available deployments and APIServices
pub const CONDITION_AVAILABLE: &str = "Available";

/// Parse a kubeconfig document
pub fn parse_kubeconfig(yaml: &str) -> Result<Kubeconfig, Error> {
    Kubeconfig::from_yaml(yaml).map_err(|e| {
        Error::internal_with_context("parse_kubeconfig", format!("invalid kubeconfig: {}", e))
    })
}

/// Create a client from a kubeconfig document using its current context
pub async fn client_from_kubeconfig(yaml: &str) -> Result<Client, Error> {
    client_from_kubeconfig_with_timeout(yaml, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a client from a kubeconfig document with custom timeouts
pub async fn client_from_kubeconfig_with_timeout(
    yaml: &str,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let kubeconfig = parse_kubeconfig(yaml)?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::internal_with_context(
                "create_client",
                format!("failed to load kubeconfig: {}", e),
            )
        })?;
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Extract a single context (with its cluster and user) as a standalone kubeconfig
///
/// Used by providers that merge every cluster into the user's default
/// kubeconfig (minikube) to hand out a per-cluster document.
pub fn extract_context(kubeconfig: &Kubeconfig, context: &str) -> Result<String, Error> {
    let named_context = kubeconfig
        .contexts
        .iter()
        .find(|c| c.name == context)
        .cloned()
        .ok_or_else(|| {
            Error::internal_with_context(
                "extract_context",
                format!("context {} not found in kubeconfig", context),
            )
        })?;
    let ctx = named_context.context.clone().ok_or_else(|| {
        Error::internal_with_context(
            "extract_context",
            format!("context {} has no cluster reference", context),
        )
    })?;

    let clusters = kubeconfig
        .clusters
        .iter()
        .filter(|c| c.name == ctx.cluster)
        .cloned()
        .collect();
    let auth_infos = kubeconfig
        .auth_infos
        .iter()
        .filter(|a| ctx.user.as_deref() == Some(a.name.as_str()))
        .cloned()
        .collect();

    let single = Kubeconfig {
        current_context: Some(context.to_string()),
        contexts: vec![named_context],
        clusters,
        auth_infos,
        ..Default::default()
    };
    serde_yaml::to_string(&single)
        .map_err(|e| Error::serialization(format!("failed to render kubeconfig: {}", e)))
}

/// Split an apiVersion into (group, version); core resources have an empty group
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an `ApiResource` from an apiVersion and kind
///
/// The plural is derived from the kind; used for the handful of resource
/// types fleetbench manages dynamically (APIService, ServiceExport).
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Pluralize a Kubernetes resource kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Check if a Kubernetes condition of the given type has status "True"
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_field() == condition_type && c.status_field() == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Trait for types that have condition-like fields (type and status)
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
}

impl HasConditionFields for k8s_openapi::api::core::v1::NodeCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

impl HasConditionFields for k8s_openapi::api::apps::v1::DeploymentCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

/// Count nodes and ready nodes
pub async fn node_readiness(client: &Client) -> Result<(u32, u32), Error> {
    let nodes: Api<Node> = Api::all(client.clone());
    let list = nodes.list(&ListParams::default()).await?;
    let total = list.items.len() as u32;
    let ready = list
        .items
        .iter()
        .filter(|node| {
            let conditions = node.status.as_ref().and_then(|s| s.conditions.as_ref());
            has_condition(conditions.map(|c| c.as_slice()), CONDITION_READY)
        })
        .count() as u32;
    Ok((total, ready))
}

/// Kubernetes server version (`gitVersion`)
pub async fn server_version(client: &Client) -> Result<String, Error> {
    let info = client.apiserver_version().await?;
    Ok(info.git_version)
}

/// Poll until a condition is met or timeout is reached
///
/// `check_fn` returns `Ok(true)` when done and `Ok(false)` to keep polling.
/// Check errors are treated as "not yet" and polling continues; the timeout
/// surfaces as [`Error::Timeout`] for `operation` on `entity`.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    operation: &str,
    entity: &str,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = tokio::time::Instant::now();

    loop {
        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => trace!(operation, entity, "Polling condition not yet met"),
            Err(e) => trace!(operation, entity, error = %e, "Polling check returned error"),
        }

        if start.elapsed() + poll_interval > timeout {
            return Err(Error::timeout(operation, entity, timeout));
        }
        tokio::time::sleep(poll_interval).await;
    }
}
