//! Cluster handle used by discovery providers
//!
//! Discovery mechanisms only need a narrow slice of the Kubernetes API:
//! ConfigMaps, deployment readiness, services/endpoints and a few dynamic
//! objects (APIService, ServiceExport). [`ClusterApi`] captures exactly that
//! slice so providers can be exercised against an in-memory cluster in tests
//! and against a real API server through [`KubeClusterApi`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Namespace, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::{json, Value};
use tracing::debug;

use fleetbench_common::kube_utils::{self, build_api_resource, has_condition, CONDITION_AVAILABLE};
use fleetbench_common::retry::{retry_with_backoff, RetryConfig};
use fleetbench_common::{Error, Result, LABEL_MANAGED_BY, LABEL_MANAGED_BY_FLEETBENCH};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "fleetbench";

/// Identity of a dynamically-typed Kubernetes object
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectRef {
    /// apiVersion (e.g. "apiregistration.k8s.io/v1")
    pub api_version: String,
    /// Kind (e.g. "APIService")
    pub kind: String,
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectRef {
    /// Reference a cluster-scoped object
    pub fn cluster_scoped(api_version: &str, kind: &str, name: impl Into<String>) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: None,
            name: name.into(),
        }
    }

    /// Reference a namespaced object
    pub fn namespaced(
        api_version: &str,
        kind: &str,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Read the identity of a manifest
    pub fn from_manifest(manifest: &Value) -> Result<Self> {
        let field = |path: &str| {
            manifest
                .pointer(path)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let missing = |what: &str| Error::serialization(format!("manifest is missing {what}"));
        Ok(Self {
            api_version: field("/apiVersion").ok_or_else(|| missing("apiVersion"))?,
            kind: field("/kind").ok_or_else(|| missing("kind"))?,
            namespace: field("/metadata/namespace"),
            name: field("/metadata/name").ok_or_else(|| missing("metadata.name"))?,
        })
    }
}

/// Labels stamped on every object fleetbench creates
pub fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(
        LABEL_MANAGED_BY.to_string(),
        LABEL_MANAGED_BY_FLEETBENCH.to_string(),
    )])
}

/// The slice of the Kubernetes API discovery mechanisms operate on
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Name of the member cluster this handle targets
    fn cluster_name(&self) -> &str;

    /// Data of a ConfigMap, `None` when it does not exist
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>>;

    /// Create or replace the data of a ConfigMap
    async fn apply_config_map(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<()>;

    /// Delete a ConfigMap; deleting a missing ConfigMap succeeds
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;

    /// Whether a deployment is available, `None` when it does not exist
    async fn deployment_ready(&self, namespace: &str, name: &str) -> Result<Option<bool>>;

    /// Trigger a rolling restart of a deployment
    async fn restart_deployment(&self, namespace: &str, name: &str) -> Result<()>;

    /// Create a namespace if missing
    async fn ensure_namespace(&self, name: &str) -> Result<()>;

    /// Names of services in a namespace matching an optional label selector
    async fn list_services(&self, namespace: &str, label_selector: Option<&str>)
        -> Result<Vec<String>>;

    /// Number of ready endpoint addresses backing a service
    async fn endpoint_count(&self, namespace: &str, service: &str) -> Result<u32>;

    /// Server-side apply an arbitrary manifest
    async fn apply_object(&self, manifest: &Value) -> Result<()>;

    /// Fetch an object, `None` when it does not exist
    async fn get_object(&self, object: &ObjectRef) -> Result<Option<Value>>;

    /// List objects of a kind carrying the given label selector
    async fn list_objects(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<Value>>;

    /// Delete an object; deleting a missing object succeeds
    async fn delete_object(&self, object: &ObjectRef) -> Result<()>;
}

/// [`ClusterApi`] backed by a kube-rs client
pub struct KubeClusterApi {
    cluster: String,
    client: Client,
    retry: RetryConfig,
}

impl KubeClusterApi {
    /// Wrap an existing client
    pub fn new(cluster: impl Into<String>, client: Client) -> Self {
        Self {
            cluster: cluster.into(),
            client,
            retry: RetryConfig::default(),
        }
    }

    /// Build a handle from a kubeconfig document
    pub async fn from_kubeconfig(cluster: impl Into<String>, kubeconfig: &str) -> Result<Self> {
        let client = kube_utils::client_from_kubeconfig(kubeconfig).await?;
        Ok(Self::new(cluster, client))
    }

    fn dynamic_api(&self, api_version: &str, kind: &str, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = build_api_resource(api_version, kind);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 404)
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    fn cluster_name(&self) -> &str {
        &self.cluster
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let cm = retry_with_backoff(&self.retry, "get_config_map", || async {
            api.get_opt(name).await.map_err(Error::from)
        })
        .await?;
        Ok(cm.map(|cm| cm.data.unwrap_or_default()))
    }

    async fn apply_config_map(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };
        let params = PatchParams::apply(FIELD_MANAGER).force();
        retry_with_backoff(&self.retry, "apply_config_map", || async {
            api.patch(name, &params, &Patch::Apply(&cm))
                .await
                .map(|_| ())
                .map_err(Error::from)
        })
        .await?;
        debug!(cluster = %self.cluster, namespace, name, "Applied ConfigMap");
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn deployment_ready(&self, namespace: &str, name: &str) -> Result<Option<bool>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let Some(deployment) = api.get_opt(name).await? else {
            return Ok(None);
        };
        let conditions = deployment.status.as_ref().and_then(|s| s.conditions.as_ref());
        Ok(Some(has_condition(
            conditions.map(|c| c.as_slice()),
            CONDITION_AVAILABLE,
        )))
    }

    async fn restart_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.restart(name).await?;
        Ok(())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(managed_labels()),
                ..Default::default()
            },
            ..Default::default()
        };
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(name, &params, &Patch::Apply(&ns)).await?;
        Ok(())
    }

    async fn list_services(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<String>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = api.list(&params).await?;
        Ok(list.items.into_iter().filter_map(|s| s.metadata.name).collect())
    }

    async fn endpoint_count(&self, namespace: &str, service: &str) -> Result<u32> {
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        let Some(endpoints) = api.get_opt(service).await? else {
            return Ok(0);
        };
        let count = endpoints
            .subsets
            .unwrap_or_default()
            .iter()
            .map(|s| s.addresses.as_ref().map_or(0, Vec::len))
            .sum::<usize>();
        Ok(count as u32)
    }

    async fn apply_object(&self, manifest: &Value) -> Result<()> {
        let target = ObjectRef::from_manifest(manifest)?;
        let api = self.dynamic_api(&target.api_version, &target.kind, target.namespace.as_deref());
        let params = PatchParams::apply(FIELD_MANAGER).force();
        retry_with_backoff(&self.retry, "apply_object", || async {
            api.patch(&target.name, &params, &Patch::Apply(manifest))
                .await
                .map(|_| ())
                .map_err(Error::from)
        })
        .await?;
        debug!(cluster = %self.cluster, kind = %target.kind, name = %target.name, "Applied object");
        Ok(())
    }

    async fn get_object(&self, object: &ObjectRef) -> Result<Option<Value>> {
        let api = self.dynamic_api(&object.api_version, &object.kind, object.namespace.as_deref());
        match api.get_opt(&object.name).await? {
            Some(obj) => Ok(Some(serde_json::to_value(obj)?)),
            None => Ok(None),
        }
    }

    async fn list_objects(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<Value>> {
        let api = self.dynamic_api(api_version, kind, namespace);
        let list = match api.list(&ListParams::default().labels(label_selector)).await {
            Ok(list) => list,
            // CRD not installed: nothing of this kind can exist
            Err(e) if is_not_found(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        list.items
            .into_iter()
            .map(|o| serde_json::to_value(o).map_err(Error::from))
            .collect()
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<()> {
        let api = self.dynamic_api(&object.api_version, &object.kind, object.namespace.as_deref());
        match api.delete(&object.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Build a `metadata` block with fleetbench labels
pub fn managed_metadata(name: &str, namespace: Option<&str>) -> Value {
    let mut meta = json!({
        "name": name,
        "labels": managed_labels(),
    });
    if let Some(ns) = namespace {
        meta["namespace"] = json!(ns);
    }
    meta
}
