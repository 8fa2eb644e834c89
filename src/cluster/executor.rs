//! Phase executor — drives the fixed phase order against the resolved
//! topology and collects per-node results.
//!
//! Phase order is storage → control → worker → optional overlay. After the
//! storage and control phases the running report is folded through the
//! aggregator; a failed aggregate stops the rollout and returns the partial
//! report. Worker failures still flow into the final verdict but nothing
//! runs after the worker phase except the best-effort overlay. Nodes within
//! a phase are handled one at a time; the phase-to-phase ordering is what
//! correctness depends on.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use rand::distr::Alphanumeric;
use rand::Rng;
use tracing::{error, info, warn};

use super::report::{ClusterReport, DeploymentResult, Verdict};
use super::topology::Topology;
use crate::auth::{self, ClusterApi};
use crate::config::NodeSpec;
use crate::remote::ChannelFactory;
use crate::services::{
    NodeContext, ServiceCatalog, ServiceUnit, ETCD_DATA_DIR, K8S_DIR, KUBELET_DATA_DIR,
};

/// Local working directories for one orchestrator run.
pub struct WorkDirs {
    /// Generated certificate material and kubeconfigs.
    pub auth: PathBuf,
    /// Scratch space for rendered unit files.
    pub service: PathBuf,
    /// Staged component binaries.
    pub staging: PathBuf,
}

impl WorkDirs {
    pub const DEFAULT_ROOT: &'static str = "/var/lib/beacon";

    pub fn new(root: &std::path::Path, staging: PathBuf) -> Self {
        Self {
            auth: root.join("auth"),
            service: root.join("service"),
            staging,
        }
    }

    /// Create (and optionally empty) the local working directories.
    pub fn prepare(&self, clear: bool) -> Result<()> {
        for dir in [&self.auth, &self.service] {
            if clear && dir.exists() {
                std::fs::remove_dir_all(dir)?;
            }
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

pub struct PhaseExecutor<'a> {
    catalog: &'a ServiceCatalog,
    channels: Arc<dyn ChannelFactory>,
    api: &'a dyn ClusterApi,
    dirs: &'a WorkDirs,
}

impl<'a> PhaseExecutor<'a> {
    pub fn new(
        catalog: &'a ServiceCatalog,
        channels: Arc<dyn ChannelFactory>,
        api: &'a dyn ClusterApi,
        dirs: &'a WorkDirs,
    ) -> Self {
        Self {
            catalog,
            channels,
            api,
            dirs,
        }
    }

    /// Run the rollout phases. `include_storage` is false when extending a
    /// live cluster, where storage membership is not re-evaluated.
    pub fn run_rollout(&self, topo: &Topology, include_storage: bool) -> ClusterReport {
        let mut report = ClusterReport::default();

        if include_storage {
            info!(nodes = topo.storage.len(), "running storage phase");
            for node in &topo.storage {
                report.push(self.deploy_node(node, &self.catalog.storage_units(), false));
            }
            if report.summarize() == Verdict::Failure {
                warn!("storage phase failed, aborting rollout");
                return report;
            }
        }

        info!(nodes = topo.control.len(), "running control phase");
        for node in &topo.control {
            let result = self.deploy_node(node, &self.catalog.control_units(node), true);
            let succeeded = result.succeeded();
            report.push(result);
            if succeeded {
                if let Err(e) = self.api.label_control_node(&node.external_ip) {
                    warn!(node = %node.hostname, error = %e, "failed to label control node");
                }
            }
        }
        if report.summarize() == Verdict::Failure {
            warn!("control phase failed, aborting rollout");
            return report;
        }

        info!(nodes = topo.worker.len(), "running worker phase");
        for node in &topo.worker {
            report.push(self.deploy_node(node, &self.catalog.worker_units(node), false));
        }

        // Best-effort: an overlay failure is a warning for the operator,
        // never part of the aggregate verdict.
        self.run_overlay(topo);

        report.summarize();
        report
    }

    /// Deploy a unit list to one node over a single session. Per-unit
    /// failures are collected, never raised.
    fn deploy_node(
        &self,
        node: &NodeSpec,
        units: &[&dyn ServiceUnit],
        stage_credentials: bool,
    ) -> DeploymentResult {
        let mut result = DeploymentResult {
            node: node.hostname.clone(),
            ip: node.external_ip.clone(),
            failed_units: Vec::new(),
        };

        let mut channel = match self.channels.open(node) {
            Ok(c) => c,
            Err(e) => {
                warn!(node = %node.hostname, error = %e, "node unreachable, marking all units failed");
                result.failed_units = units.iter().map(|u| u.name().to_string()).collect();
                return result;
            }
        };

        let mut ctx = NodeContext {
            ip: &node.external_ip,
            hostname: &node.hostname,
            auth_dir: &self.dirs.auth,
            service_dir: &self.dirs.service,
            staging_dir: &self.dirs.staging,
            channel: channel.as_mut(),
        };

        for unit in units {
            match unit.deploy(&mut ctx).and_then(|_| unit.start(&mut ctx)) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(unit = unit.name(), node = %node.hostname, "unit did not report healthy");
                    result.failed_units.push(unit.name().to_string());
                }
                Err(e) => {
                    warn!(unit = unit.name(), node = %node.hostname, error = %e, "unit deployment errored");
                    result.failed_units.push(unit.name().to_string());
                }
            }
        }

        if stage_credentials {
            if let Err(e) = Self::stage_admin_credentials(&mut ctx) {
                warn!(node = %node.hostname, error = %e, "failed to stage admin credentials");
            }
        }

        ctx.channel.close();
        result
    }

    fn stage_admin_credentials(ctx: &mut NodeContext) -> Result<()> {
        ctx.channel.prep_dir("/root/.kube/", false)?;
        let kubeconfig = ctx.auth_dir.join(auth::ADMIN_KUBECONFIG);
        ctx.channel.copy(&kubeconfig, "/root/.kube/config", false)
    }

    /// Deploy the overlay plugin to the first control node only.
    fn run_overlay(&self, topo: &Topology) {
        let Some(overlay) = &self.catalog.overlay else {
            return;
        };
        let Some(node) = topo.control.first() else {
            return;
        };

        info!(node = %node.hostname, "deploying overlay network plugin");
        let mut channel = match self.channels.open(node) {
            Ok(c) => c,
            Err(e) => {
                error!(
                    node = %node.hostname,
                    error = %e,
                    "cannot reach node for overlay deployment; deploy the plugin manually"
                );
                return;
            }
        };

        let mut ctx = NodeContext {
            ip: &node.external_ip,
            hostname: &node.hostname,
            auth_dir: &self.dirs.auth,
            service_dir: &self.dirs.service,
            staging_dir: &self.dirs.staging,
            channel: channel.as_mut(),
        };

        match overlay.deploy(&mut ctx).and_then(|_| overlay.start(&mut ctx)) {
            Ok(true) => info!("overlay network plugin deployed"),
            Ok(false) => error!(
                node = %node.hostname,
                "overlay plugin did not apply cleanly; deploy it manually"
            ),
            Err(e) => error!(
                node = %node.hostname,
                error = %e,
                "overlay deployment errored; deploy the plugin manually"
            ),
        }
        ctx.channel.close();
    }

    /// Tear down previously deployed units: control nodes, then storage
    /// nodes, then worker nodes. Storage data is renamed aside rather than
    /// deleted; the container runtime is restarted on every node at the end
    /// of its handling, whatever else happened.
    pub fn run_teardown(&self, topo: &Topology, clear: bool) {
        for node in &topo.control {
            self.teardown_node(node, &self.catalog.control_teardown_units(), clear, false);
        }
        for node in &topo.storage {
            self.teardown_node(node, &self.catalog.storage_teardown_units(), false, true);
        }
        for node in &topo.worker {
            self.teardown_node(node, &self.catalog.worker_teardown_units(), clear, false);
        }
    }

    fn teardown_node(
        &self,
        node: &NodeSpec,
        units: &[&dyn ServiceUnit],
        clear: bool,
        backup_storage_data: bool,
    ) {
        info!(node = %node.hostname, "tearing down node");
        let mut channel = match self.channels.open(node) {
            Ok(c) => c,
            Err(e) => {
                warn!(node = %node.hostname, error = %e, "node unreachable, skipping teardown");
                return;
            }
        };

        let mut ctx = NodeContext {
            ip: &node.external_ip,
            hostname: &node.hostname,
            auth_dir: &self.dirs.auth,
            service_dir: &self.dirs.service,
            staging_dir: &self.dirs.staging,
            channel: channel.as_mut(),
        };

        for unit in units {
            if let Err(e) = unit.stop(&mut ctx) {
                warn!(unit = unit.name(), node = %node.hostname, error = %e, "failed to stop unit");
            }
            best_effort(&mut ctx, &format!("systemctl disable {}", unit.name()));
        }

        if backup_storage_data {
            let backup = format!("etcd_bak_{}", random_suffix());
            info!(node = %node.hostname, backup = %backup, "renaming storage data dir aside");
            best_effort(
                &mut ctx,
                &format!("mv {ETCD_DATA_DIR} /var/lib/{backup}/"),
            );
        }

        if clear {
            best_effort(&mut ctx, "umount /var/lib/kubelet/pods/*/volumes/*/*");
            best_effort(&mut ctx, &format!("rm -rf {KUBELET_DATA_DIR} {K8S_DIR}"));
        }

        // Forced recovery step, independent of teardown outcome.
        best_effort(&mut ctx, "systemctl restart docker");
        ctx.channel.close();
    }
}

fn best_effort(ctx: &mut NodeContext, cmd: &str) {
    if let Err(e) = ctx.channel.execute(cmd) {
        warn!(node = ctx.hostname, command = cmd, error = %e, "command failed, continuing");
    }
}

fn random_suffix() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}
