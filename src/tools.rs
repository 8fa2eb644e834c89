//! Local tool lookup and execution on the deploy host.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};

/// Search PATH and the local install dir for a tool.
pub fn find(name: &str) -> Option<PathBuf> {
    if let Some(p) = find_in_path(name) {
        return Some(p);
    }

    let p = PathBuf::from("/usr/local/bin").join(name);
    if p.is_file() {
        return Some(p);
    }

    None
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    })
}

/// Run a local command and capture stdout as a string.
pub fn output(program: &str, args: &[&str]) -> Result<String> {
    let out = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to run {program}"))?;
    if !out.status.success() {
        anyhow::bail!(
            "{program} exited with {}: {}",
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}

/// Run a local command for effect only; failure is an error with stderr
/// attached.
pub fn run(program: &str, args: &[&str]) -> Result<()> {
    output(program, args).map(|_| ())
}
