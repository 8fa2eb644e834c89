//! `beacon precheck` — run the environment validator without deploying.

use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;

use crate::cluster::precheck::EnvironmentValidator;
use crate::commands;
use crate::error::DeployError;
use crate::remote::SshChannelFactory;

pub fn run(config: Option<&str>, lenient: bool) -> Result<()> {
    let spec = commands::load_spec(config)?;
    commands::init_logging(&spec.log_level);

    println!("{}", "beacon precheck".bold());
    println!();

    let validator = EnvironmentValidator::new(&spec, Arc::new(SshChannelFactory));
    match validator.run(!lenient) {
        Ok(summary) => {
            for node in &summary.nodes {
                if node.details.is_empty() {
                    println!("  {} {} ({})", "ok".green().bold(), node.node.bold(), node.ip.dimmed());
                } else {
                    println!(
                        "  {} {} ({}) — {}",
                        "ok".green().bold(),
                        node.node.bold(),
                        node.ip.dimmed(),
                        node.details.dimmed()
                    );
                }
            }
            println!("  {} clock skew within bounds", "ok".green().bold());
            println!();
            println!("{} Environment check passed", "ok".green().bold());
            Ok(())
        }
        Err(DeployError::Precheck { message }) => {
            eprintln!("{} {}", "!!".red().bold(), message);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}
