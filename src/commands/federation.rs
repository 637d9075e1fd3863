//! Federation command - cross-cluster trust and service discovery
//!
//! Usage: fleetbench federation <configure|teardown|status>

use std::fmt::Write as _;

use clap::{Args, Subcommand};

use fleetbench_common::types::FederationStatus;

use super::{discovery_config, federation_configurator, Context};
use crate::{Outcome, Result};

/// Configure cross-cluster trust and service discovery
#[derive(Args, Debug)]
pub struct FederationArgs {
    #[command(subcommand)]
    pub command: FederationCommand,
}

#[derive(Subcommand, Debug)]
pub enum FederationCommand {
    /// Write trust config and install discovery on participating members
    Configure,
    /// Uninstall discovery and remove trust config
    Teardown,
    /// Show trust and discovery state per member
    Status,
}

/// Run the federation command
pub async fn run(ctx: &Context, args: FederationArgs) -> Result<Outcome> {
    let doc = ctx.load_document()?;
    let configurator = federation_configurator();
    let discovery = discovery_config(&doc);

    match args.command {
        FederationCommand::Configure => {
            let status = configurator.configure(&doc.topology, &discovery).await?;
            ctx.print(&status, federation_text)?;
        }
        FederationCommand::Teardown => {
            let report = configurator.teardown(&doc.topology, &discovery).await?;
            ctx.print(&report, |r| format!("torn down: {}", r.deleted.join(", ")))?;
            report.into_result()?;
        }
        FederationCommand::Status => {
            let status = configurator.status(&doc.topology, &discovery).await?;
            ctx.print(&status, federation_text)?;
        }
    }
    Ok(Outcome::Success)
}

/// Human-readable federation status
pub fn federation_text(status: &FederationStatus) -> String {
    let mut out = format!(
        "trust domain {} ({})\nconfigured: {}",
        status.trust_domain,
        status.mechanism.as_deref().unwrap_or("no discovery"),
        status.configured.join(", ")
    );
    for (cluster, discovery) in &status.discovery {
        let _ = write!(out, "\n  {cluster:<16}{}", discovery.state.to_string());
        if let Some(error) = &discovery.error {
            let _ = write!(out, " ({error})");
        }
    }
    out
}
