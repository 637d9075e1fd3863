//! Topology command - provision, tear down and inspect the configured topology
//!
//! Usage: fleetbench topology <create|delete|status|list>

use std::collections::BTreeMap;
use std::fmt::Write as _;

use clap::{Args, Subcommand};
use tracing::{info, warn};

use fleetbench_common::types::{ClusterStatus, TopologyStatus};

use super::{discovery_config, federation_configurator, topology_manager, Context};
use crate::{Outcome, Result};

/// Manage the configured topology
#[derive(Args, Debug)]
pub struct TopologyArgs {
    #[command(subcommand)]
    pub command: TopologyCommand,
}

#[derive(Subcommand, Debug)]
pub enum TopologyCommand {
    /// Create the primary, then every remote concurrently
    Create {
        /// Also configure federation once the clusters are up
        #[arg(long)]
        federate: bool,
    },
    /// Delete every remote, then the primary
    Delete,
    /// Show health of every member
    Status,
    /// List clusters known to the topology's providers
    List {
        /// Only query this provider
        #[arg(long)]
        provider: Option<String>,
    },
}

/// Run the topology command
pub async fn run(ctx: &Context, args: TopologyArgs) -> Result<Outcome> {
    let doc = ctx.load_document()?;
    let manager = topology_manager(&doc);
    let topology = &doc.topology;

    match args.command {
        TopologyCommand::Create { federate } => {
            manager.create_topology(topology).await?;
            if federate && topology.federation.enabled {
                federation_configurator()
                    .configure(topology, &discovery_config(&doc))
                    .await?;
            } else if federate {
                warn!(topology = %topology.name, "Federation is not enabled, skipping");
            }
            let status = manager.get_topology_status(topology).await;
            ctx.print(&status, status_text)?;
        }
        TopologyCommand::Delete => {
            let report = manager.delete_topology(topology).await;
            ctx.print(&report, |r| {
                let mut out = format!("deleted: {}", r.deleted.join(", "));
                for f in &r.failed {
                    let _ = write!(out, "\nfailed:  {} ({})", f.entity, f.message);
                }
                out
            })?;
            report.into_result()?;
        }
        TopologyCommand::Status => {
            let mut status = manager.get_topology_status(topology).await;
            if topology.federation.enabled {
                match federation_configurator()
                    .status(topology, &discovery_config(&doc))
                    .await
                {
                    Ok(federation) => {
                        status.healthy &= federation.healthy();
                        status.federation = Some(federation);
                    }
                    Err(e) => warn!(topology = %topology.name, error = %e, "Federation status unavailable"),
                }
            }
            ctx.print(&status, status_text)?;
        }
        TopologyCommand::List { provider } => {
            let providers: Vec<String> = match provider {
                Some(p) => vec![p],
                None => topology.providers().into_iter().map(str::to_string).collect(),
            };
            let mut clusters = BTreeMap::new();
            for provider in providers {
                let names = manager.list_clusters(&provider).await?;
                info!(provider = %provider, count = names.len(), "Listed clusters");
                clusters.insert(provider, names);
            }
            ctx.print(&clusters, |c| {
                c.iter()
                    .flat_map(|(provider, names)| names.iter().map(move |n| format!("{provider}\t{n}")))
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
        }
    }
    Ok(Outcome::Success)
}

fn cluster_line(role: &str, status: &ClusterStatus) -> String {
    let mut line = format!(
        "{role:<8}{:<16}{:<10}{}/{} nodes",
        status.name,
        status.state.to_string(),
        status.ready_nodes,
        status.nodes
    );
    if let Some(version) = &status.version {
        let _ = write!(line, "  {version}");
    }
    if let Some(error) = &status.error {
        let _ = write!(line, "  ({error})");
    }
    line
}

/// Human-readable topology status
pub fn status_text(status: &TopologyStatus) -> String {
    let mut out = format!(
        "topology {}: {}\n",
        status.name,
        if status.healthy { "healthy" } else { "unhealthy" }
    );
    if let Some(primary) = &status.primary {
        let _ = writeln!(out, "{}", cluster_line("primary", primary));
    }
    for remote in status.remotes.values() {
        let _ = writeln!(out, "{}", cluster_line("remote", remote));
    }
    for missing in &status.missing {
        let _ = writeln!(out, "{:<8}{missing:<16}missing", "-");
    }
    if !status.network.cidr_conflicts.is_empty() {
        let _ = writeln!(out, "cidr conflicts: {}", status.network.cidr_conflicts.join(", "));
    }
    if let Some(federation) = &status.federation {
        let _ = writeln!(
            out,
            "federation: trust domain {}, configured on {}",
            federation.trust_domain,
            federation.configured.join(", ")
        );
        for (cluster, discovery) in &federation.discovery {
            let _ = writeln!(
                out,
                "  {cluster:<16}{} {} ({} services, {} endpoints)",
                discovery.mechanism, discovery.state, discovery.services, discovery.endpoints
            );
        }
    }
    out.trim_end().to_string()
}
