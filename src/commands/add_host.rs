//! `beacon add-host` — extend a live cluster with the control and worker
//! tiers of the spec.

use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;

use crate::auth::{KubectlApi, OpensslCa};
use crate::cluster::orchestrator::Orchestrator;
use crate::cluster::report::Verdict;
use crate::commands;
use crate::error::DeployError;
use crate::remote::SshChannelFactory;

pub fn run(config: Option<&str>, format: &str) -> Result<()> {
    let spec = commands::load_spec(config)?;
    commands::init_logging(&spec.log_level);

    println!("{}", "beacon add-host".bold());
    println!(
        "{} Adding hosts to the initiated cluster",
        "::".blue().bold()
    );

    let ca = OpensslCa;
    let api = KubectlApi::new(Some(spec.staging_dir()));
    let orchestrator = Orchestrator::new(&spec, Arc::new(SshChannelFactory), &ca, &api);

    let report = match orchestrator.add_host() {
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

    commands::print_report(&report, format)?;
    if report.summary == Verdict::Failure {
        std::process::exit(1);
    }
    Ok(())
}
