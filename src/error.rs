//! Typed failure taxonomy for the deployment orchestrator.
//!
//! Only three conditions abort an entrypoint: a structurally invalid cluster
//! spec, a failed environment precheck, and a missing staged binary. Per-node
//! and per-unit failures during a rollout are never errors; they are carried
//! as data in the deployment report.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    /// Malformed or structurally invalid cluster spec. Always fatal.
    #[error("invalid cluster config: {reason}")]
    Config { reason: String },

    /// Environment not ready for deployment. Fatal to deploy/add-host.
    #[error("environment precheck failed: {message}")]
    Precheck { message: String },

    /// A declared binary is missing from the staging directory while
    /// redownload is disabled.
    #[error("binary '{name}' not found under {}", path.display())]
    BinaryNotFound { name: String, path: PathBuf },

    /// Plumbing failures (local filesystem, certificate tooling, downloads).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeployError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn precheck(message: impl Into<String>) -> Self {
        Self::Precheck {
            message: message.into(),
        }
    }
}
