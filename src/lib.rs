//! fleetbench CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// fleetbench - multi-cluster Kubernetes test topologies and distributed test runs
#[derive(Parser, Debug)]
#[command(name = "fleetbench")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration document (default: $FLEETBENCH_CONFIG or ./fleetbench.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Output format for command results
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Output format for command results
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary
    #[default]
    Text,
    /// JSON
    Json,
    /// YAML
    Yaml,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create, delete and inspect the configured topology
    Topology(commands::topology::TopologyArgs),
    /// Manage a single cluster without a configuration document
    Cluster(commands::cluster::ClusterArgs),
    /// Configure cross-cluster trust and service discovery
    Federation(commands::federation::FederationArgs),
    /// Run or validate tests
    Test(commands::test::TestArgs),
}

/// How a successful command ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Everything succeeded
    Success,
    /// Tests ran and at least one case failed
    TestsFailed,
}

impl Outcome {
    /// Process exit code
    pub fn exit_code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::TestsFailed => 1,
        }
    }
}

/// Exit code for errors: topology, cluster or execution failures
pub const ERROR_EXIT_CODE: u8 = 2;

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<Outcome> {
        let ctx = commands::Context {
            config: self.config,
            output: self.output,
        };
        match self.command {
            Commands::Topology(args) => commands::topology::run(&ctx, args).await,
            Commands::Cluster(args) => commands::cluster::run(&ctx, args).await,
            Commands::Federation(args) => commands::federation::run(&ctx, args).await,
            Commands::Test(args) => commands::test::run(&ctx, args).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "fleetbench",
            "topology",
            "status",
            "--config",
            "lab.yaml",
            "-o",
            "json",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("lab.yaml")));
        assert_eq!(cli.output, OutputFormat::Json);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Commands::Topology(_)));
    }

    #[test]
    fn parses_test_run_filters() {
        let cli = Cli::try_parse_from([
            "fleetbench",
            "test",
            "run",
            "--type",
            "command",
            "--tags",
            "fast,mesh",
            "--parallel",
            "smoke",
            "mesh",
        ])
        .unwrap();
        let Commands::Test(args) = cli.command else {
            panic!("expected test command");
        };
        let commands::test::TestCommand::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.test_type.as_deref(), Some("command"));
        assert_eq!(run.tags, vec!["fast", "mesh"]);
        assert!(run.parallel);
        assert!(!run.multi_cluster);
        assert_eq!(run.names, vec!["smoke", "mesh"]);
    }

    #[test]
    fn cluster_create_requires_provider_and_name() {
        assert!(Cli::try_parse_from(["fleetbench", "cluster", "create", "--name", "p1"]).is_err());
        let cli = Cli::try_parse_from([
            "fleetbench",
            "cluster",
            "create",
            "--provider",
            "kind",
            "--name",
            "p1",
            "--kubernetes-version",
            "1.30.4",
        ]);
        assert!(cli.is_ok());
    }

    #[test]
    fn exit_codes_distinguish_failures_from_errors() {
        assert_eq!(Outcome::Success.exit_code(), 0);
        assert_eq!(Outcome::TestsFailed.exit_code(), 1);
        assert_eq!(ERROR_EXIT_CODE, 2);
    }
}
