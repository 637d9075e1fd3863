//! kind (Kubernetes in Docker) provider

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use fleetbench_common::kube_utils;
use fleetbench_common::types::{ClusterConfig, ClusterStatus};
use fleetbench_common::{Error, Result};

use super::command::{args, CommandRunner, TokioCommandRunner};
use super::ClusterProvider;

/// Provider identifier
pub const PROVIDER_ID: &str = "kind";

const KIND_BINARY: &str = "kind";
const NODE_IMAGE_REPO: &str = "kindest/node";

const RECOGNIZED_OPTIONS: &[&str] = &["nodes", "image", "apiServerPort", "disableDefaultCni"];

/// Typed kind options
#[derive(Clone, Debug, PartialEq, Eq)]
struct KindOptions {
    /// Total nodes including the control plane
    nodes: u32,
    image: String,
    api_server_port: Option<u32>,
    disable_default_cni: bool,
}

impl KindOptions {
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
        let api_server_port = options.u32(owner, "apiServerPort")?;
        if let Some(port) = api_server_port {
            if port == 0 || port > u32::from(u16::MAX) {
                return Err(Error::config_invalid_field(
                    owner,
                    "options.apiServerPort",
                    format!("{port} is not a valid port"),
                ));
            }
        }

        Ok(Self {
            nodes,
            image: options
                .string(owner, "image")?
                .unwrap_or_else(|| format!("{NODE_IMAGE_REPO}:{}", config.version_tag())),
            api_server_port,
            disable_default_cni: options.bool(owner, "disableDefaultCni")?.unwrap_or(false),
        })
    }

    /// Render the kind cluster config fed to `kind create cluster --config -`
    fn render(&self) -> String {
        let mut out = String::from("kind: Cluster\napiVersion: kind.x-k8s.io/v1alpha4\n");
        if self.api_server_port.is_some() || self.disable_default_cni {
            out.push_str("networking:\n");
            if let Some(port) = self.api_server_port {
                let _ = writeln!(out, "  apiServerPort: {port}");
            }
            if self.disable_default_cni {
                out.push_str("  disableDefaultCNI: true\n");
            }
        }
        out.push_str("nodes:\n");
        let _ = writeln!(out, "- role: control-plane\n  image: {}", self.image);
        for _ in 1..self.nodes {
            let _ = writeln!(out, "- role: worker\n  image: {}", self.image);
        }
        out
    }
}

/// Cluster provider driving the `kind` CLI
pub struct KindProvider {
    runner: Arc<dyn CommandRunner>,
}

impl Default for KindProvider {
    fn default() -> Self {
        Self::new(Arc::new(TokioCommandRunner))
    }
}

impl KindProvider {
    /// Create a provider using the given command runner
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.list().await?.iter().any(|c| c == name))
    }
}

#[async_trait]
impl ClusterProvider for KindProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn validate(&self, config: &ClusterConfig) -> Result<()> {
        config.validate()?;
        KindOptions::from_config(config).map(|_| ())
    }

    async fn create(&self, config: &ClusterConfig) -> Result<()> {
        let options = KindOptions::from_config(config)?;
        let name = config.name.as_str();

        let exists = self
            .exists(name)
            .await
            .map_err(|e| Error::create_failed(name, PROVIDER_ID, e.to_string()))?;
        if exists {
            return Err(Error::create_failed_permanent(name, PROVIDER_ID, "cluster already exists"));
        }

        info!(cluster = %name, nodes = options.nodes, image = %options.image, "Creating kind cluster");
        let output = self
            .runner
            .run(
                KIND_BINARY,
                args(["create", "cluster", "--name", name, "--config", "-"]),
                Some(options.render()),
            )
            .await
            .map_err(|e| Error::create_failed(name, PROVIDER_ID, e.to_string()))?;

        if !output.success {
            let diagnostics = output.diagnostics();
            return Err(if diagnostics.contains("already exist") {
                Error::create_failed_permanent(name, PROVIDER_ID, diagnostics)
            } else {
                Error::create_failed(name, PROVIDER_ID, diagnostics)
            });
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let exists = self
            .exists(name)
            .await
            .map_err(|e| Error::delete_failed(name, PROVIDER_ID, e.to_string()))?;
        if !exists {
            debug!(cluster = %name, "kind cluster already absent");
            return Ok(());
        }
        info!(cluster = %name, "Deleting kind cluster");
        let output = self
            .runner
            .run(KIND_BINARY, args(["delete", "cluster", "--name", name]), None)
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
        let kubeconfig = self.kubeconfig(name).await?;
        Ok(super::observe_nodes(name, &kubeconfig).await)
    }

    async fn kubeconfig(&self, name: &str) -> Result<String> {
        let output = self
            .runner
            .run(KIND_BINARY, args(["get", "kubeconfig", "--name", name]), None)
            .await?;
        if !output.success {
            let diagnostics = output.diagnostics();
            if diagnostics.contains("could not locate") || diagnostics.contains("not found") {
                return Err(Error::cluster_not_found(name, PROVIDER_ID));
            }
            return Err(Error::internal_with_context("kind get kubeconfig", diagnostics));
        }
        // Fail early on garbage rather than at first use
        kube_utils::parse_kubeconfig(&output.stdout)?;
        Ok(output.stdout)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let output = self
            .runner
            .run(KIND_BINARY, args(["get", "clusters"]), None)
            .await?;
        if !output.success {
            return Err(Error::internal_with_context("kind get clusters", output.diagnostics()));
        }
        // "No kind clusters found." goes to stderr, so stdout only holds names
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::command::{CommandOutput, MockCommandRunner};
    use fleetbench_common::types::OptionBag;

    const KUBECONFIG: &str = r#"apiVersion: v1
kind: Config
current-context: kind-p1
clusters:
- name: kind-p1
  cluster:
    server: https://127.0.0.1:6443
contexts:
- name: kind-p1
  context:
    cluster: kind-p1
    user: kind-p1
users:
- name: kind-p1
  user:
    token: abc
"#;

    fn provider_with(
        existing: &'static [&'static str],
        create: CommandOutput,
    ) -> KindProvider {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(move |program, argv, stdin| {
            assert_eq!(program, KIND_BINARY);
            let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
            Ok(match argv.as_slice() {
                ["get", "clusters"] => CommandOutput::ok(existing.join("\n")),
                ["create", "cluster", "--name", _, "--config", "-"] => {
                    let config = stdin.unwrap_or_default();
                    assert!(config.starts_with("kind: Cluster"));
                    create.clone()
                }
                ["delete", "cluster", "--name", _] => CommandOutput::ok(""),
                ["get", "kubeconfig", "--name", "p1"] => CommandOutput::ok(KUBECONFIG),
                ["get", "kubeconfig", "--name", _] => {
                    CommandOutput::failed(1, "ERROR: could not locate any control plane nodes")
                }
                other => panic!("unexpected kind invocation {other:?}"),
            })
        });
        KindProvider::new(Arc::new(runner))
    }

    #[test]
    fn renders_workers_and_networking() {
        let config = ClusterConfig::new("kind", "r1").with_version("1.30.4").with_options(
            OptionBag::new()
                .with("nodes", 3)
                .with("apiServerPort", 7443)
                .with("disableDefaultCni", true),
        );
        let rendered = KindOptions::from_config(&config).unwrap().render();
        assert_eq!(rendered.matches("role: worker").count(), 2);
        assert_eq!(rendered.matches("role: control-plane").count(), 1);
        assert!(rendered.contains("image: kindest/node:v1.30.4"));
        assert!(rendered.contains("apiServerPort: 7443"));
        assert!(rendered.contains("disableDefaultCNI: true"));
    }

    #[test]
    fn rejects_unknown_and_invalid_options() {
        let provider = KindProvider::new(Arc::new(MockCommandRunner::new()));
        let bad = ClusterConfig::new("kind", "r1").with_options(OptionBag::new().with("memory", 4096));
        assert!(matches!(provider.validate(&bad), Err(Error::ConfigInvalid { .. })));

        let bad = ClusterConfig::new("kind", "r1").with_options(OptionBag::new().with("nodes", 0));
        assert!(provider.validate(&bad).is_err());

        let bad = ClusterConfig::new("kind", "r1")
            .with_options(OptionBag::new().with("apiServerPort", 70000));
        assert!(provider.validate(&bad).is_err());
    }

    #[tokio::test]
    async fn create_feeds_rendered_config() {
        let provider = provider_with(&[], CommandOutput::ok(""));
        provider.create(&ClusterConfig::new("kind", "r1")).await.unwrap();
    }

    /// Story: an existing cluster is reported as a permanent create failure
    #[tokio::test]
    async fn story_existing_cluster_is_not_retried() {
        let provider = provider_with(&["r1"], CommandOutput::ok(""));
        let err = provider.create(&ClusterConfig::new("kind", "r1")).await.unwrap_err();
        assert!(matches!(err, Error::ClusterCreateFailed { retryable: false, .. }));
        assert_eq!(err.cluster(), Some("r1"));
    }

    #[tokio::test]
    async fn create_failure_carries_diagnostics() {
        let provider = provider_with(
            &[],
            CommandOutput::failed(1, "ERROR: failed to create cluster: docker not running"),
        );
        let err = provider.create(&ClusterConfig::new("kind", "r2")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("docker not running"));
    }

    #[tokio::test]
    async fn list_and_missing_status() {
        let provider = provider_with(&["p1", "r1"], CommandOutput::ok(""));
        assert_eq!(provider.list().await.unwrap(), vec!["p1", "r1"]);
        assert!(matches!(
            provider.status("r9").await,
            Err(Error::ClusterNotFound { .. })
        ));
        assert!(matches!(
            provider.kubeconfig("r9").await,
            Err(Error::ClusterNotFound { .. })
        ));
        assert!(provider.kubeconfig("p1").await.unwrap().contains("kind-p1"));
    }

    /// Story: an unreachable container runtime still names the cluster
    ///
    /// When `kind get clusters` itself fails, create and delete report a
    /// cluster-scoped failure so topology errors say which member broke.
    #[tokio::test]
    async fn story_membership_check_failure_names_the_cluster() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_, argv, _| {
            assert_eq!(argv, ["get", "clusters"]);
            Ok(CommandOutput::failed(1, "Cannot connect to the Docker daemon"))
        });
        let provider = KindProvider::new(Arc::new(runner));

        let err = provider.create(&ClusterConfig::new("kind", "p1")).await.unwrap_err();
        assert!(matches!(err, Error::ClusterCreateFailed { .. }));
        assert_eq!(err.cluster(), Some("p1"));
        assert!(err.to_string().contains("Docker daemon"));

        let err = provider.delete("r1").await.unwrap_err();
        assert!(matches!(err, Error::ClusterDeleteFailed { .. }));
        assert_eq!(err.cluster(), Some("r1"));
    }

    #[tokio::test]
    async fn delete_of_absent_cluster_succeeds() {
        let provider = provider_with(&["p1"], CommandOutput::ok(""));
        provider.delete("r1").await.unwrap();
        provider.delete("p1").await.unwrap();
    }
}
