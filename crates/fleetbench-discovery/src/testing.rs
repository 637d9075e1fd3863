//! In-memory [`ClusterApi`] for tests
//!
//! Stores ConfigMaps, deployments, services, endpoints and dynamic objects in
//! plain maps so discovery providers and the federation configurator can be
//! exercised without an API server. Individual calls can be made to fail to
//! simulate an unreachable cluster.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use fleetbench_common::{Error, Result};

use crate::cluster_api::{ClusterApi, ObjectRef};

#[derive(Default)]
struct State {
    namespaces: BTreeSet<String>,
    config_maps: BTreeMap<(String, String), BTreeMap<String, String>>,
    deployments: BTreeMap<(String, String), bool>,
    restarts: BTreeMap<(String, String), u32>,
    services: BTreeMap<(String, String), BTreeMap<String, String>>,
    endpoints: BTreeMap<(String, String), u32>,
    objects: BTreeMap<ObjectRef, Value>,
    unreachable: bool,
}

/// A fake member cluster
pub struct InMemoryCluster {
    name: String,
    state: Mutex<State>,
}

impl InMemoryCluster {
    /// Empty cluster
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Cluster with a ready CoreDNS deployment and a stock Corefile
    pub fn with_coredns(name: impl Into<String>) -> Self {
        let cluster = Self::new(name);
        {
            let mut state = cluster.state.lock();
            state.config_maps.insert(
                key("kube-system", "coredns"),
                BTreeMap::from([("Corefile".to_string(), STOCK_COREFILE.to_string())]),
            );
            state.deployments.insert(key("kube-system", "coredns"), true);
            state.endpoints.insert(key("kube-system", "kube-dns"), 2);
        }
        cluster
    }

    /// Add a deployment with the given availability
    pub fn add_deployment(&self, namespace: &str, name: &str, ready: bool) {
        self.state.lock().deployments.insert(key(namespace, name), ready);
    }

    /// Add a service with labels and a number of ready endpoint addresses
    pub fn add_service(&self, namespace: &str, name: &str, labels: &[(&str, &str)], endpoints: u32) {
        let mut state = self.state.lock();
        state.namespaces.insert(namespace.to_string());
        state.services.insert(
            key(namespace, name),
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        state.endpoints.insert(key(namespace, name), endpoints);
    }

    /// Put an object directly into the store (e.g. a status set by a controller)
    pub fn put_object(&self, manifest: Value) {
        if let Ok(r) = ObjectRef::from_manifest(&manifest) {
            self.state.lock().objects.insert(r, manifest);
        }
    }

    /// Make every subsequent call fail as if the API server were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Current data of a ConfigMap
    pub fn config_map(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        self.state.lock().config_maps.get(&key(namespace, name)).cloned()
    }

    /// Overwrite a single ConfigMap key
    pub fn set_config_map_key(&self, namespace: &str, name: &str, k: &str, v: &str) {
        self.state
            .lock()
            .config_maps
            .entry(key(namespace, name))
            .or_default()
            .insert(k.to_string(), v.to_string());
    }

    /// Number of restarts requested for a deployment
    pub fn restarts(&self, namespace: &str, name: &str) -> u32 {
        self.state
            .lock()
            .restarts
            .get(&key(namespace, name))
            .copied()
            .unwrap_or(0)
    }

    /// Stored object, if any
    pub fn object(&self, object: &ObjectRef) -> Option<Value> {
        self.state.lock().objects.get(object).cloned()
    }

    /// Number of stored objects of a kind
    pub fn object_count(&self, kind: &str) -> usize {
        self.state
            .lock()
            .objects
            .keys()
            .filter(|r| r.kind == kind)
            .count()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.state.lock().unreachable {
            return Err(Error::unhealthy(&self.name, "api server unreachable"));
        }
        Ok(())
    }
}

/// Corefile shipped by kind and minikube, trimmed
pub const STOCK_COREFILE: &str = ".:53 {
    errors
    health {
       lameduck 5s
    }
    ready
    kubernetes cluster.local in-addr.arpa ip6.arpa {
       pods insecure
       fallthrough in-addr.arpa ip6.arpa
       ttl 30
    }
    forward . /etc/resolv.conf
    cache 30
    loop
    reload
}
";

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => labels.contains_key(term),
        })
}

fn object_labels(object: &Value) -> BTreeMap<String, String> {
    object
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    fn cluster_name(&self) -> &str {
        &self.name
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        self.check_reachable()?;
        Ok(self.config_map(namespace, name))
    }

    async fn apply_config_map(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<()> {
        self.check_reachable()?;
        self.state.lock().config_maps.insert(key(namespace, name), data);
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        self.check_reachable()?;
        self.state.lock().config_maps.remove(&key(namespace, name));
        Ok(())
    }

    async fn deployment_ready(&self, namespace: &str, name: &str) -> Result<Option<bool>> {
        self.check_reachable()?;
        Ok(self.state.lock().deployments.get(&key(namespace, name)).copied())
    }

    async fn restart_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        self.check_reachable()?;
        let mut state = self.state.lock();
        if !state.deployments.contains_key(&key(namespace, name)) {
            return Err(Error::not_found("deployment", format!("{namespace}/{name}")));
        }
        *state.restarts.entry(key(namespace, name)).or_default() += 1;
        Ok(())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        self.check_reachable()?;
        self.state.lock().namespaces.insert(name.to_string());
        Ok(())
    }

    async fn list_services(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<String>> {
        self.check_reachable()?;
        let state = self.state.lock();
        Ok(state
            .services
            .iter()
            .filter(|((ns, _), labels)| {
                ns == namespace && label_selector.map_or(true, |s| selector_matches(s, labels))
            })
            .map(|((_, name), _)| name.clone())
            .collect())
    }

    async fn endpoint_count(&self, namespace: &str, service: &str) -> Result<u32> {
        self.check_reachable()?;
        Ok(self
            .state
            .lock()
            .endpoints
            .get(&key(namespace, service))
            .copied()
            .unwrap_or(0))
    }

    async fn apply_object(&self, manifest: &Value) -> Result<()> {
        self.check_reachable()?;
        let r = ObjectRef::from_manifest(manifest)?;
        let mut state = self.state.lock();
        // Keep controller-written status across re-applies
        let status = state.objects.get(&r).and_then(|o| o.get("status").cloned());
        let mut stored = manifest.clone();
        if let (Some(status), Some(obj)) = (status, stored.as_object_mut()) {
            obj.entry("status").or_insert(status);
        }
        state.objects.insert(r, stored);
        Ok(())
    }

    async fn get_object(&self, object: &ObjectRef) -> Result<Option<Value>> {
        self.check_reachable()?;
        Ok(self.object(object))
    }

    async fn list_objects(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<Value>> {
        self.check_reachable()?;
        let state = self.state.lock();
        Ok(state
            .objects
            .iter()
            .filter(|(r, obj)| {
                r.api_version == api_version
                    && r.kind == kind
                    && (namespace.is_none() || r.namespace.as_deref() == namespace)
                    && selector_matches(label_selector, &object_labels(obj))
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<()> {
        self.check_reachable()?;
        self.state.lock().objects.remove(object);
        Ok(())
    }
}
