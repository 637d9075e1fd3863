//! Cluster command - manage one cluster without a configuration document
//!
//! Usage: fleetbench cluster <create|delete|status|list> --provider kind --name p1

use clap::{Args, Subcommand};

use fleetbench_cluster::{ClusterProviderRegistry, TopologyManager};
use fleetbench_common::config::TimeoutSettings;
use fleetbench_common::types::ClusterConfig;

use super::Context;
use crate::{Outcome, Result};

/// Manage a single cluster
#[derive(Args, Debug)]
pub struct ClusterArgs {
    #[command(subcommand)]
    pub command: ClusterCommand,
}

/// Identifies one cluster
#[derive(Args, Debug)]
pub struct ClusterTarget {
    /// Cluster provider (kind, minikube)
    #[arg(long)]
    pub provider: String,

    /// Cluster name
    #[arg(long)]
    pub name: String,
}

#[derive(Subcommand, Debug)]
pub enum ClusterCommand {
    /// Create a cluster and wait for it to become healthy
    Create {
        #[command(flatten)]
        target: ClusterTarget,

        /// Kubernetes version (default: provider default)
        #[arg(long)]
        kubernetes_version: Option<String>,
    },
    /// Delete a cluster; deleting an absent cluster succeeds
    Delete {
        #[command(flatten)]
        target: ClusterTarget,
    },
    /// Show node readiness of a cluster
    Status {
        #[command(flatten)]
        target: ClusterTarget,
    },
    /// List clusters known to a provider
    List {
        /// Cluster provider (kind, minikube)
        #[arg(long)]
        provider: String,
    },
}

fn cluster_config(target: &ClusterTarget, version: Option<&str>) -> ClusterConfig {
    let config = ClusterConfig::new(&target.provider, &target.name);
    match version {
        Some(v) => config.with_version(v),
        None => config,
    }
}

/// Run the cluster command
pub async fn run(ctx: &Context, args: ClusterArgs) -> Result<Outcome> {
    let manager = TopologyManager::new(
        ClusterProviderRegistry::with_defaults(),
        TimeoutSettings::default(),
    );

    match args.command {
        ClusterCommand::Create {
            target,
            kubernetes_version,
        } => {
            let config = cluster_config(&target, kubernetes_version.as_deref());
            manager.create_cluster(&config).await?;
            let status = manager.cluster_status(&config).await?;
            ctx.print(&status, |s| format!("{} {}", s.name, s.state))?;
        }
        ClusterCommand::Delete { target } => {
            manager.delete_cluster(&cluster_config(&target, None)).await?;
            ctx.print(&target.name, |name| format!("{name} deleted"))?;
        }
        ClusterCommand::Status { target } => {
            let status = manager.cluster_status(&cluster_config(&target, None)).await?;
            ctx.print(&status, |s| {
                let mut line = format!(
                    "{} {} {}/{} nodes ready",
                    s.name, s.state, s.ready_nodes, s.nodes
                );
                if let Some(error) = &s.error {
                    line.push_str(&format!(" ({error})"));
                }
                line
            })?;
        }
        ClusterCommand::List { provider } => {
            let clusters = manager.list_clusters(&provider).await?;
            ctx.print(&clusters, |c| c.join("\n"))?;
        }
    }
    Ok(Outcome::Success)
}
