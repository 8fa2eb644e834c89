//! `beacon reset` — tear down the last deployment.

use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;

use crate::auth::{KubectlApi, OpensslCa};
use crate::cluster::orchestrator::Orchestrator;
use crate::commands;
use crate::remote::SshChannelFactory;

pub fn run(config: Option<&str>, clear: bool, yes: bool) -> Result<()> {
    let spec = commands::load_spec(config)?;
    commands::init_logging(&spec.log_level);

    println!("{}", "beacon reset".bold());

    if clear && !yes {
        if !commands::confirm(
            "This deletes node state directories (storage data is renamed aside). Continue?",
        )? {
            println!("{} Reset aborted", "::".blue().bold());
            return Ok(());
        }
    }

    let ca = OpensslCa;
    let api = KubectlApi::new(Some(spec.staging_dir()));
    let orchestrator = Orchestrator::new(&spec, Arc::new(SshChannelFactory), &ca, &api);
    orchestrator.reset(clear)?;

    println!("{} Clean-up finished", "ok".green().bold());
    Ok(())
}
