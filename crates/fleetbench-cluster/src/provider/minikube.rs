//! minikube provider
//!
//! Each cluster is a minikube profile. minikube merges every profile into
//! the user's kubeconfig, so per-cluster kubeconfigs are cut out of it by
//! context name.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kube::config::Kubeconfig;
use serde::Deserialize;
use tracing::{debug, info};

use fleetbench_common::kube_utils;
use fleetbench_common::types::{ClusterConfig, ClusterStatus};
use fleetbench_common::{Error, Result};

use super::command::{args, CommandRunner, TokioCommandRunner};
use super::ClusterProvider;

/// Provider identifier
pub const PROVIDER_ID: &str = "minikube";

const MINIKUBE_BINARY: &str = "minikube";
const RUNNING: &str = "Running";

const RECOGNIZED_OPTIONS: &[&str] = &["nodes", "memory", "cpus", "driver", "addons"];

#[derive(Clone, Debug, PartialEq, Eq)]
struct MinikubeOptions {
    nodes: u32,
    /// Memory per node in MiB
    memory: Option<u32>,
    cpus: Option<u32>,
    driver: Option<String>,
    addons: Vec<String>,
}

impl MinikubeOptions {
    fn from_config(config: &ClusterConfig) -> Result<Self> {
        let options = &config.options;
        let owner = config.name.as_str();
        options.ensure_recognized(owner, RECOGNIZED_OPTIONS)?;

        let nodes = options.u32(owner, "nodes")?.unwrap_or(1);
        if nodes == 0 {
            return Err(Error::config_invalid_field(
                owner,
                "options.nodes",
                "a cluster needs at least one node",
            ));
        }
        let cpus = options.u32(owner, "cpus")?;
        if cpus == Some(0) {
            return Err(Error::config_invalid_field(owner, "options.cpus", "cpus must be positive"));
        }

        Ok(Self {
            nodes,
            memory: options.u32(owner, "memory")?,
            cpus,
            driver: options.string(owner, "driver")?,
            addons: options.string_list(owner, "addons")?,
        })
    }

    fn start_args(&self, config: &ClusterConfig) -> Vec<String> {
        let mut argv = args(["start", "-p", config.name.as_str()]);
        argv.push(format!("--kubernetes-version={}", config.version_tag()));
        argv.push(format!("--nodes={}", self.nodes));
        if let Some(memory) = self.memory {
            argv.push(format!("--memory={memory}"));
        }
        if let Some(cpus) = self.cpus {
            argv.push(format!("--cpus={cpus}"));
        }
        if let Some(driver) = &self.driver {
            argv.push(format!("--driver={driver}"));
        }
        for addon in &self.addons {
            argv.push(format!("--addons={addon}"));
        }
        argv
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProfileList {
    #[serde(default)]
    valid: Vec<Profile>,
    /// Profiles minikube cannot use, typically left behind by a failed start
    #[serde(default)]
    invalid: Vec<Profile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Profile {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProfileStatus {
    #[serde(default)]
    host: String,
    #[serde(default, rename = "APIServer")]
    api_server: String,
}

/// Cluster provider driving the `minikube` CLI
pub struct MinikubeProvider {
    runner: Arc<dyn CommandRunner>,
    kubeconfig_path: Option<PathBuf>,
}

impl Default for MinikubeProvider {
    fn default() -> Self {
        Self::new(Arc::new(TokioCommandRunner))
    }
}

impl MinikubeProvider {
    /// Create a provider reading the default kubeconfig (`KUBECONFIG` or `~/.kube/config`)
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            kubeconfig_path: None,
        }
    }

    /// Read merged kubeconfigs from an explicit path
    pub fn with_kubeconfig_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig_path = Some(path.into());
        self
    }

    fn merged_kubeconfig(&self) -> Result<Kubeconfig> {
        let read = match &self.kubeconfig_path {
            Some(path) => Kubeconfig::read_from(path),
            None => Kubeconfig::read(),
        };
        read.map_err(|e| {
            Error::internal_with_context("minikube kubeconfig", format!("failed to read kubeconfig: {e}"))
        })
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.list().await?.iter().any(|p| p == name))
    }
}

#[async_trait]
impl ClusterProvider for MinikubeProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn validate(&self, config: &ClusterConfig) -> Result<()> {
        config.validate()?;
        MinikubeOptions::from_config(config).map(|_| ())
    }

    async fn create(&self, config: &ClusterConfig) -> Result<()> {
        let options = MinikubeOptions::from_config(config)?;
        let name = config.name.as_str();

        let exists = self
            .exists(name)
            .await
            .map_err(|e| Error::create_failed(name, PROVIDER_ID, e.to_string()))?;
        if exists {
            return Err(Error::create_failed_permanent(name, PROVIDER_ID, "profile already exists"));
        }

        info!(cluster = %name, nodes = options.nodes, driver = ?options.driver, "Starting minikube profile");
        let output = self
            .runner
            .run(MINIKUBE_BINARY, options.start_args(config), None)
            .await
            .map_err(|e| Error::create_failed(name, PROVIDER_ID, e.to_string()))?;
        if !output.success {
            return Err(Error::create_failed(name, PROVIDER_ID, output.diagnostics()));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let exists = self
            .exists(name)
            .await
            .map_err(|e| Error::delete_failed(name, PROVIDER_ID, e.to_string()))?;
        if !exists {
            debug!(cluster = %name, "minikube profile already absent");
            return Ok(());
        }
        info!(cluster = %name, "Deleting minikube profile");
        let output = self
            .runner
            .run(MINIKUBE_BINARY, args(["delete", "-p", name]), None)
            .await
            .map_err(|e| Error::delete_failed(name, PROVIDER_ID, e.to_string()))?;
        if !output.success {
            return Err(Error::delete_failed(name, PROVIDER_ID, output.diagnostics()));
        }
        Ok(())
    }

    async fn status(&self, name: &str) -> Result<ClusterStatus> {
        if !self.exists(name).await? {
            return Err(Error::cluster_not_found(name, PROVIDER_ID));
        }

        // `minikube status` exits non-zero for stopped profiles but still prints JSON
        let output = self
            .runner
            .run(MINIKUBE_BINARY, args(["status", "-p", name, "-o", "json"]), None)
            .await?;
        // Multi-node profiles print one object per node; the first is the control plane
        let first = output.stdout.trim_start().trim_start_matches('[');
        let status: ProfileStatus = serde_json::Deserializer::from_str(first)
            .into_iter::<ProfileStatus>()
            .next()
            .transpose()?
            .ok_or_else(|| Error::internal_with_context("minikube status", output.diagnostics()))?;

        if status.host != RUNNING || status.api_server != RUNNING {
            return Ok(ClusterStatus::errored(
                name,
                format!("host {}, apiserver {}", status.host, status.api_server),
            ));
        }

        let kubeconfig = self.kubeconfig(name).await?;
        Ok(super::observe_nodes(name, &kubeconfig).await)
    }

    async fn kubeconfig(&self, name: &str) -> Result<String> {
        let merged = self.merged_kubeconfig()?;
        if !merged.contexts.iter().any(|c| c.name == name) {
            return Err(Error::cluster_not_found(name, PROVIDER_ID));
        }
        kube_utils::extract_context(&merged, name)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let output = self
            .runner
            .run(MINIKUBE_BINARY, args(["profile", "list", "-o", "json"]), None)
            .await?;
        if !output.success && output.stdout.trim().is_empty() {
            // minikube exits 85 when no profile exists
            return Ok(Vec::new());
        }
        let profiles: ProfileList = if output.stdout.trim().is_empty() {
            ProfileList::default()
        } else {
            serde_json::from_str(&output.stdout)?
        };
        Ok(profiles
            .valid
            .into_iter()
            .chain(profiles.invalid)
            .map(|p| p.name)
            .collect())
    }
}
