//! Service units — the installable components of the cluster.
//!
//! Each unit knows how to render its own configuration, push it to a node
//! over an established channel, and drive its lifecycle through systemd.
//! Units hold only cluster-wide settings captured at `configure` time; all
//! transient node state (address, hostname, bound channel) travels in the
//! `NodeContext`, so one configured unit can be deployed to any number of
//! nodes in sequence or in parallel.

mod apiserver;
mod controller_manager;
mod docker;
mod etcd;
mod kubelet;
mod overlay;
mod proxy;
mod scheduler;

pub use apiserver::ApiserverUnit;
pub use controller_manager::ControllerManagerUnit;
pub use docker::DockerUnit;
pub use etcd::{EtcdUnit, ETCD_DATA_DIR};
pub use kubelet::{KubeletUnit, KUBELET_DATA_DIR};
pub use overlay::CalicoUnit;
pub use proxy::ProxyUnit;
pub use scheduler::SchedulerUnit;

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{ClusterSpec, NodeSpec, Role};
use crate::remote::CommandChannel;

pub const SYSTEMD_DIR: &str = "/etc/systemd/system/";
pub const K8S_DIR: &str = "/etc/kubernetes/";
pub const K8S_SSL_DIR: &str = "/etc/kubernetes/ssl/";
pub const ETCD_SSL_DIR: &str = "/etc/etcd/ssl/";
pub const REMOTE_BIN_DIR: &str = "/usr/bin/";

/// Name of the container the storage daemon runs in; the precheck greps for
/// leftovers under this name.
pub const ETCD_CONTAINER: &str = "beacon-etcd";

/// Transient, per-node deployment state.
pub struct NodeContext<'a> {
    pub ip: &'a str,
    pub hostname: &'a str,
    /// Local dir holding generated certificate material.
    pub auth_dir: &'a Path,
    /// Local scratch dir for rendered unit files.
    pub service_dir: &'a Path,
    /// Local dir holding staged component binaries.
    pub staging_dir: &'a Path,
    pub channel: &'a mut (dyn CommandChannel + Send),
}

pub trait ServiceUnit {
    /// The systemd unit name (also the name reported in failure lists).
    fn name(&self) -> &'static str;

    /// Capture cluster-wide settings. Called once per orchestrator run,
    /// before any phase.
    fn configure(&mut self, spec: &ClusterSpec) -> Result<()>;

    /// Idempotent install/render step for one node.
    fn deploy(&self, ctx: &mut NodeContext) -> Result<()>;

    /// Start the unit; true iff it reports healthy.
    fn start(&self, ctx: &mut NodeContext) -> Result<bool> {
        info!(unit = self.name(), node = ctx.hostname, "starting unit");
        let out = ctx
            .channel
            .execute(&format!("systemctl restart {}", self.name()))?;
        if out.iter().any(|l| l.contains("Failed") || l.contains("failed")) {
            return Ok(false);
        }
        let state = ctx
            .channel
            .execute(&format!("systemctl is-active {}", self.name()))?;
        Ok(state.first().map(|s| s.trim() == "active").unwrap_or(false))
    }

    fn stop(&self, ctx: &mut NodeContext) -> Result<()> {
        ctx.channel
            .execute(&format!("systemctl stop {}", self.name()))?;
        Ok(())
    }
}

/// Render a file into the local service dir and push it to a remote
/// destination directory.
pub(crate) fn stage_file(
    ctx: &mut NodeContext,
    file_name: &str,
    content: &str,
    remote_dir: &str,
) -> Result<()> {
    std::fs::create_dir_all(ctx.service_dir)
        .with_context(|| format!("failed to create {}", ctx.service_dir.display()))?;
    let local = ctx.service_dir.join(file_name);
    std::fs::write(&local, content)
        .with_context(|| format!("failed to write {}", local.display()))?;
    ctx.channel.copy(&local, remote_dir, false)
}

/// Push a staged binary into the remote bin dir.
pub(crate) fn push_binary(ctx: &mut NodeContext, name: &str) -> Result<()> {
    ctx.channel
        .copy(&ctx.staging_dir.join(name), REMOTE_BIN_DIR, false)
}

/// Copy a generated auth file to a remote directory.
pub(crate) fn push_auth_file(ctx: &mut NodeContext, name: &str, remote_dir: &str) -> Result<()> {
    ctx.channel.copy(&ctx.auth_dir.join(name), remote_dir, false)
}

pub(crate) fn enable_unit(ctx: &mut NodeContext, name: &str) -> Result<()> {
    ctx.channel.execute("systemctl daemon-reload")?;
    ctx.channel.execute(&format!("systemctl enable {name}"))?;
    Ok(())
}

/// All units of one orchestrator run, configured once against the spec.
pub struct ServiceCatalog {
    pub runtime: DockerUnit,
    pub etcd: EtcdUnit,
    pub apiserver: ApiserverUnit,
    pub controller_manager: ControllerManagerUnit,
    pub scheduler: SchedulerUnit,
    pub kubelet: KubeletUnit,
    pub proxy: ProxyUnit,
    pub overlay: Option<CalicoUnit>,
}

impl ServiceCatalog {
    pub fn configure(spec: &ClusterSpec) -> Result<Self> {
        let mut runtime = DockerUnit::default();
        let mut etcd = EtcdUnit::default();
        let mut apiserver = ApiserverUnit::default();
        let mut controller_manager = ControllerManagerUnit::default();
        let mut scheduler = SchedulerUnit::default();
        let mut kubelet = KubeletUnit::default();
        let mut proxy = ProxyUnit::default();

        runtime.configure(spec)?;
        etcd.configure(spec)?;
        apiserver.configure(spec)?;
        controller_manager.configure(spec)?;
        scheduler.configure(spec)?;
        kubelet.configure(spec)?;
        proxy.configure(spec)?;

        let overlay = match spec.cni.plugin.as_str() {
            "calico" => {
                let mut unit = CalicoUnit::default();
                unit.configure(spec)?;
                Some(unit)
            }
            other => {
                warn!(plugin = other, "unknown overlay plugin, skipping overlay phase");
                None
            }
        };

        Ok(Self {
            runtime,
            etcd,
            apiserver,
            controller_manager,
            scheduler,
            kubelet,
            proxy,
            overlay,
        })
    }

    /// Storage tier: container runtime, then the storage daemon.
    pub fn storage_units(&self) -> Vec<&dyn ServiceUnit> {
        vec![&self.runtime, &self.etcd]
    }

    /// Control tier. The runtime is prepended only when this node did not
    /// already receive it in the storage phase.
    pub fn control_units(&self, node: &NodeSpec) -> Vec<&dyn ServiceUnit> {
        let mut units: Vec<&dyn ServiceUnit> = Vec::new();
        if !node.has_role(Role::Storage) {
            units.push(&self.runtime);
        }
        units.push(&self.apiserver);
        units.push(&self.controller_manager);
        units.push(&self.scheduler);
        units.push(&self.kubelet);
        units.push(&self.proxy);
        units
    }

    /// Worker tier, with the same runtime rule as the control tier.
    pub fn worker_units(&self, node: &NodeSpec) -> Vec<&dyn ServiceUnit> {
        let mut units: Vec<&dyn ServiceUnit> = Vec::new();
        if !node.has_role(Role::Storage) {
            units.push(&self.runtime);
        }
        units.push(&self.kubelet);
        units.push(&self.proxy);
        units
    }

    /// Units torn down on control nodes during reset.
    pub fn control_teardown_units(&self) -> Vec<&dyn ServiceUnit> {
        vec![
            &self.runtime,
            &self.apiserver,
            &self.controller_manager,
            &self.scheduler,
            &self.kubelet,
            &self.proxy,
        ]
    }

    /// Units torn down on storage nodes during reset. The runtime is kept
    /// running so the data-dir backup rename can complete.
    pub fn storage_teardown_units(&self) -> Vec<&dyn ServiceUnit> {
        vec![&self.etcd]
    }

    /// Units torn down on worker nodes during reset.
    pub fn worker_teardown_units(&self) -> Vec<&dyn ServiceUnit> {
        vec![&self.runtime, &self.kubelet, &self.proxy]
    }
}
