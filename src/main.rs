mod auth;
mod binaries;
mod cluster;
mod commands;
mod config;
mod error;
mod remote;
mod services;
mod tools;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "beacon",
    version,
    about = "Phased multi-node Kubernetes cluster deployment over SSH"
)]
struct Cli {
    /// Path to the cluster spec file (default: ~/.config/beacon/cluster.yml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the environment and roll out the full cluster
    Deploy {
        /// Output format (table or json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Add hosts to an initiated cluster (control and worker tiers only)
    AddHost {
        /// Output format (table or json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Tear down the last deployment
    Reset {
        /// Also unmount pod volumes and delete node state directories
        #[arg(long)]
        clear: bool,

        /// Skip confirmation prompts
        #[arg(long)]
        yes: bool,
    },

    /// Run the environment precheck without deploying
    Precheck {
        /// Record leftover state without failing on it
        #[arg(long)]
        lenient: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Deploy { format } => commands::deploy::run(cli.config.as_deref(), &format),
        Commands::AddHost { format } => commands::add_host::run(cli.config.as_deref(), &format),
        Commands::Reset { clear, yes } => commands::reset::run(cli.config.as_deref(), clear, yes),
        Commands::Precheck { lenient } => commands::precheck::run(cli.config.as_deref(), lenient),
    }
}
