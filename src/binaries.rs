//! Local binary staging.
//!
//! Before any phase runs, every declared component binary must sit in the
//! staging directory: either re-downloaded from the configured mirror or
//! already present from an earlier run. A missing binary with redownload
//! disabled aborts the deployment.

use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::ClusterSpec;
use crate::error::DeployError;

/// Stage all declared binaries according to the provisioning policy.
pub fn prepare(spec: &ClusterSpec) -> Result<(), DeployError> {
    let staging = spec.staging_dir();
    match spec.binaries.redownload.as_str() {
        "yes" => download_all(spec, &staging)?,
        "no" => check_present(spec, &staging)?,
        other => {
            return Err(DeployError::config(format!(
                "binaries.redownload must be \"yes\" or \"no\", got '{other}'"
            )))
        }
    }
    Ok(())
}

fn check_present(spec: &ClusterSpec, staging: &Path) -> Result<(), DeployError> {
    for name in &spec.binaries.list {
        if !staging.join(name).is_file() {
            return Err(DeployError::BinaryNotFound {
                name: name.clone(),
                path: staging.to_path_buf(),
            });
        }
    }
    Ok(())
}

fn download_all(spec: &ClusterSpec, staging: &Path) -> Result<()> {
    let base = spec
        .binaries
        .download_url
        .as_deref()
        .context("binaries.download_url is required when redownload is \"yes\"")?;

    if staging.exists() {
        std::fs::remove_dir_all(staging)
            .with_context(|| format!("failed to clear staging dir {}", staging.display()))?;
    }
    std::fs::create_dir_all(staging)
        .with_context(|| format!("failed to create staging dir {}", staging.display()))?;

    for name in &spec.binaries.list {
        let url = format!("{}/{}", base.trim_end_matches('/'), name);
        info!(binary = %name, url = %url, "downloading");

        let bytes = reqwest::blocking::get(&url)
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("failed to download {url}"))?
            .bytes()
            .with_context(|| format!("failed to read body of {url}"))?;

        if let Some(expected) = spec.binaries.sha256.get(name) {
            let actual = sha256_hex(&bytes);
            if !actual.eq_ignore_ascii_case(expected) {
                anyhow::bail!(
                    "checksum mismatch for {name}: expected {expected}, got {actual}"
                );
            }
        }

        let dest = staging.join(name);
        std::fs::write(&dest, &bytes)
            .with_context(|| format!("failed to write {}", dest.display()))?;
        set_executable(&dest)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to chmod {}", path.display()))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Install kubectl from the staging dir onto the deploy host so the
/// orchestrator can drive the cluster API locally.
pub fn install_kubectl(staging: &Path, dest_dir: &Path) -> Result<()> {
    let src = staging.join("kubectl");
    if !src.is_file() {
        warn!(
            staging = %staging.display(),
            "kubectl not staged, skipping local install"
        );
        return Ok(());
    }
    let dest = dest_dir.join("kubectl");
    std::fs::copy(&src, &dest)
        .with_context(|| format!("failed to install kubectl to {}", dest.display()))?;
    set_executable(&dest)?;
    info!(dest = %dest.display(), "installed kubectl");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::config::{BinarySpec, ClusterSpec, NodeSpec, Role};

    fn spec_with_staging(staging: &Path, redownload: &str) -> ClusterSpec {
        ClusterSpec {
            nodes: vec![NodeSpec {
                external_ip: "10.0.0.1".to_string(),
                ssh_user: "root".to_string(),
                ssh_password: String::new(),
                hostname: "n1".to_string(),
                role: BTreeSet::from([Role::Storage, Role::Control]),
            }],
            binaries: BinarySpec {
                list: vec!["kube-apiserver".to_string(), "kubelet".to_string()],
                redownload: redownload.to_string(),
                download_url: None,
                path: staging.display().to_string(),
                sha256: Default::default(),
            },
            cni: Default::default(),
            kubernetes: Default::default(),
            runtime: Default::default(),
            log_level: "info".to_string(),
            admin_kubeconfig: None,
        }
    }

    #[test]
    fn present_binaries_pass_without_download() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("kube-apiserver"), b"bin").unwrap();
        std::fs::write(dir.path().join("kubelet"), b"bin").unwrap();

        let spec = spec_with_staging(dir.path(), "no");
        prepare(&spec).expect("staged binaries should pass");
    }

    #[test]
    fn missing_binary_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("kube-apiserver"), b"bin").unwrap();

        let spec = spec_with_staging(dir.path(), "no");
        let err = prepare(&spec).expect_err("missing kubelet must fail");
        match err {
            DeployError::BinaryNotFound { name, .. } => assert_eq!(name, "kubelet"),
            other => panic!("expected BinaryNotFound, got {other}"),
        }
    }

    #[test]
    fn malformed_redownload_mode_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = spec_with_staging(dir.path(), "maybe");
        let err = prepare(&spec).expect_err("bad mode must fail");
        assert!(matches!(err, DeployError::Config { .. }));
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn install_kubectl_copies_into_dest() {
        let staging = tempfile::tempdir().expect("tempdir");
        let dest = tempfile::tempdir().expect("tempdir");
        std::fs::write(staging.path().join("kubectl"), b"#!/bin/sh").unwrap();

        install_kubectl(staging.path(), dest.path()).expect("install should succeed");
        assert!(dest.path().join("kubectl").is_file());
    }

    #[test]
    fn install_kubectl_is_a_noop_without_staged_binary() {
        let staging = tempfile::tempdir().expect("tempdir");
        let dest = tempfile::tempdir().expect("tempdir");
        install_kubectl(staging.path(), dest.path()).expect("missing kubectl is not fatal");
        assert!(!dest.path().join("kubectl").is_file());
    }
}
