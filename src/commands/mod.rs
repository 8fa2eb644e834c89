//! Thin CLI handlers. All orchestration lives in `cluster::orchestrator`;
//! these functions load the spec, wire up the production collaborators, and
//! render the resulting report.

pub mod add_host;
pub mod deploy;
pub mod precheck;
pub mod reset;

use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;

use crate::cluster::report::{ClusterReport, Verdict};
use crate::config::ClusterSpec;

pub(crate) fn load_spec(config: Option<&str>) -> Result<ClusterSpec> {
    let path = config
        .map(PathBuf::from)
        .unwrap_or_else(ClusterSpec::default_path);
    ClusterSpec::load(&path)
}

pub(crate) fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub(crate) fn print_report(report: &ClusterReport, format: &str) -> Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!();
    println!("{}", "Deployment Report".bold());
    for result in &report.nodes {
        if result.succeeded() {
            println!(
                "  {} {} ({})",
                "ok".green().bold(),
                result.node.bold(),
                result.ip.dimmed()
            );
        } else {
            println!(
                "  {} {} ({}) — failed units: {}",
                "!!".red().bold(),
                result.node.bold(),
                result.ip.dimmed(),
                result.failed_units.join(", ")
            );
        }
    }
    println!();
    let verdict = match report.summary {
        Verdict::Success => "success".green().bold(),
        Verdict::Failure => "failure".red().bold(),
    };
    println!("  summary: {verdict}");
    println!();
    Ok(())
}

pub(crate) fn confirm(prompt: &str) -> Result<bool> {
    use std::io::Write;
    print!("{} {} [y/N] ", "::".blue().bold(), prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
