//! Scheduler of the control plane.

use anyhow::Result;
use tracing::info;

use super::{enable_unit, push_binary, stage_file, NodeContext, ServiceUnit, SYSTEMD_DIR};
use crate::config::ClusterSpec;

#[derive(Default)]
pub struct SchedulerUnit;

const UNIT: &str = r#"[Unit]
Description=Kubernetes Scheduler
After=kube-apiserver.service

[Service]
ExecStart=/usr/bin/kube-scheduler \
  --master=http://127.0.0.1:8080 \
  --leader-elect=true
Restart=on-failure
RestartSec=5

[Install]
WantedBy=multi-user.target
"#;

impl ServiceUnit for SchedulerUnit {
    fn name(&self) -> &'static str {
        "kube-scheduler"
    }

    fn configure(&mut self, _spec: &ClusterSpec) -> Result<()> {
        Ok(())
    }

    fn deploy(&self, ctx: &mut NodeContext) -> Result<()> {
        info!(node = ctx.hostname, ip = ctx.ip, "deploying kube-scheduler");
        push_binary(ctx, self.name())?;
        stage_file(ctx, "kube-scheduler.service", UNIT, SYSTEMD_DIR)?;
        enable_unit(ctx, self.name())
    }
}
