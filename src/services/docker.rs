//! Container runtime unit.
//!
//! The runtime binary itself comes from the node's package manager (the
//! precheck requires it); this unit only lays down the daemon configuration
//! and makes sure the service is enabled.

use anyhow::Result;
use tracing::info;

use super::{enable_unit, stage_file, NodeContext, ServiceUnit};
use crate::config::ClusterSpec;

#[derive(Default)]
pub struct DockerUnit;

const DAEMON_JSON: &str = r#"{
  "exec-opts": ["native.cgroupdriver=systemd"],
  "log-driver": "json-file",
  "log-opts": {
    "max-size": "100m"
  },
  "storage-driver": "overlay2"
}
"#;

impl ServiceUnit for DockerUnit {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn configure(&mut self, _spec: &ClusterSpec) -> Result<()> {
        Ok(())
    }

    fn deploy(&self, ctx: &mut NodeContext) -> Result<()> {
        info!(node = ctx.hostname, ip = ctx.ip, "deploying container runtime config");
        ctx.channel.prep_dir("/etc/docker/", false)?;
        stage_file(ctx, "daemon.json", DAEMON_JSON, "/etc/docker/")?;
        enable_unit(ctx, self.name())
    }
}
