//! `beacon deploy` — full phased rollout from the cluster spec.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;

use crate::auth::{KubectlApi, OpensslCa};
use crate::binaries;
use crate::cluster::orchestrator::Orchestrator;
use crate::cluster::report::Verdict;
use crate::commands;
use crate::error::DeployError;
use crate::remote::SshChannelFactory;

pub fn run(config: Option<&str>, format: &str) -> Result<()> {
    let spec = commands::load_spec(config)?;
    commands::init_logging(&spec.log_level);

    println!("{}", "beacon deploy".bold());
    println!(
        "{} Rolling out a cluster across {} nodes",
        "::".blue().bold(),
        spec.nodes.len()
    );

    let ca = OpensslCa;
    let api = KubectlApi::new(Some(spec.staging_dir()));
    let orchestrator = Orchestrator::new(&spec, Arc::new(SshChannelFactory), &ca, &api);

    let report = match orchestrator.deploy() {
        Ok(report) => report,
        Err(DeployError::Precheck { message }) => {
            eprintln!(
                "{} Environment precheck failed: {}",
                "!!".red().bold(),
                message
            );
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    // Keep a copy of the cluster CLI on the deploy host for day-2 use.
    binaries::install_kubectl(&spec.staging_dir(), Path::new("/usr/local/bin"))?;

    commands::print_report(&report, format)?;
    if report.summary == Verdict::Failure {
        std::process::exit(1);
    }
    Ok(())
}
