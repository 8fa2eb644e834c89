//! Cluster spec — YAML-based declarative input for every beacon command.
//!
//! The spec is read-only for the duration of a command: the orchestrator
//! derives topology and drives remote hosts from it but never writes it back.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::DeployError;

/// Top-level cluster specification, usually `cluster.yml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub nodes: Vec<NodeSpec>,

    pub binaries: BinarySpec,

    #[serde(default)]
    pub cni: CniSpec,

    #[serde(default)]
    pub kubernetes: KubernetesSpec,

    #[serde(default)]
    pub runtime: RuntimeSpec,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Path to an admin kubeconfig for a live cluster. Only consulted by
    /// `add-host`.
    #[serde(default)]
    pub admin_kubeconfig: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One machine in the cluster. A node may carry any non-empty combination of
/// roles; membership is set containment, not exclusive category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(rename = "external_IP", alias = "external_ip")]
    pub external_ip: String,
    pub ssh_user: String,
    #[serde(default)]
    pub ssh_password: String,
    pub hostname: String,
    pub role: BTreeSet<Role>,
}

impl NodeSpec {
    pub fn has_role(&self, role: Role) -> bool {
        self.role.contains(&role)
    }
}

/// Closed role set. `etcd` is accepted as a legacy spelling of the storage
/// tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "etcd")]
    Storage,
    Control,
    Worker,
}

/// Binary provisioning policy for the local staging directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinarySpec {
    pub list: Vec<String>,
    /// "yes" clears the staging dir and downloads everything; "no" requires
    /// the binaries to already be present. Anything else is a config error.
    pub redownload: String,
    #[serde(default)]
    pub download_url: Option<String>,
    pub path: String,
    /// Optional hex sha256 per binary name, verified after download.
    #[serde(default)]
    pub sha256: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CniSpec {
    pub plugin: String,
}

impl Default for CniSpec {
    fn default() -> Self {
        Self {
            plugin: "calico".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesSpec {
    #[serde(default = "default_cluster_cidr")]
    pub cluster_cidr: String,
    #[serde(default = "default_service_cidr")]
    pub service_cidr: String,
}

impl Default for KubernetesSpec {
    fn default() -> Self {
        Self {
            cluster_cidr: default_cluster_cidr(),
            service_cidr: default_service_cidr(),
        }
    }
}

fn default_cluster_cidr() -> String {
    "172.20.0.0/16".to_string()
}

fn default_service_cidr() -> String {
    "10.68.0.0/16".to_string()
}

/// Container runtime constraints checked during the environment precheck.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSpec {
    /// A node passes if its reported runtime version starts with any of
    /// these prefixes.
    #[serde(default = "default_allowed_versions")]
    pub allowed_versions: Vec<String>,
}

impl Default for RuntimeSpec {
    fn default() -> Self {
        Self {
            allowed_versions: default_allowed_versions(),
        }
    }
}

fn default_allowed_versions() -> Vec<String> {
    vec!["20.10".to_string(), "23.0".to_string(), "24.0".to_string()]
}

impl ClusterSpec {
    /// Default spec path: `~/.config/beacon/cluster.yml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("beacon")
            .join("cluster.yml")
    }

    /// Load a spec from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read cluster spec from {}", path.display()))?;
        let spec: ClusterSpec = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse cluster spec from {}", path.display()))?;
        Ok(spec)
    }

    /// Structural validation that does not require any remote access.
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.nodes.is_empty() {
            return Err(DeployError::config("spec declares no nodes"));
        }
        for node in &self.nodes {
            if node.role.is_empty() {
                return Err(DeployError::config(format!(
                    "node '{}' carries no role tags",
                    node.hostname
                )));
            }
        }
        Ok(())
    }

    pub fn staging_dir(&self) -> PathBuf {
        PathBuf::from(&self.binaries.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
nodes:
  - external_IP: 10.0.0.1
    ssh_user: root
    ssh_password: secret
    hostname: node-1
    role: [etcd, control]
  - external_IP: 10.0.0.2
    ssh_user: root
    ssh_password: secret
    hostname: node-2
    role: [worker]
binaries:
  list: [kube-apiserver, kubelet]
  redownload: "no"
  path: /tmp/beacon-bin/
log_level: debug
"#;

    #[test]
    fn parses_roles_including_etcd_alias() {
        let spec: ClusterSpec = serde_yaml::from_str(MINIMAL).expect("spec should parse");
        assert!(spec.nodes[0].has_role(Role::Storage));
        assert!(spec.nodes[0].has_role(Role::Control));
        assert!(!spec.nodes[0].has_role(Role::Worker));
        assert!(spec.nodes[1].has_role(Role::Worker));
        assert_eq!(spec.log_level, "debug");
    }

    #[test]
    fn absent_sections_fall_back_to_defaults() {
        let spec: ClusterSpec = serde_yaml::from_str(MINIMAL).expect("spec should parse");
        assert_eq!(spec.cni.plugin, "calico");
        assert_eq!(spec.kubernetes.cluster_cidr, "172.20.0.0/16");
        assert_eq!(spec.kubernetes.service_cidr, "10.68.0.0/16");
        assert!(!spec.runtime.allowed_versions.is_empty());
        assert!(spec.admin_kubeconfig.is_none());
    }

    #[test]
    fn node_without_roles_is_rejected() {
        let yaml = MINIMAL.replace("role: [worker]", "role: []");
        let spec: ClusterSpec = serde_yaml::from_str(&yaml).expect("spec should parse");
        let err = spec.validate().expect_err("empty role set must be rejected");
        assert!(matches!(err, DeployError::Config { .. }));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = ClusterSpec::load(Path::new("/nonexistent/cluster.yml"))
            .expect_err("missing file must error");
        assert!(err.to_string().contains("/nonexistent/cluster.yml"));
    }
}
