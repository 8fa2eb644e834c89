//! Controller manager of the control plane. Talks to the API server over
//! loopback on the same node.

use anyhow::Result;
use tracing::info;

use super::{
    enable_unit, push_auth_file, push_binary, stage_file, NodeContext, ServiceUnit, K8S_SSL_DIR,
    SYSTEMD_DIR,
};
use crate::auth;
use crate::config::ClusterSpec;

#[derive(Default)]
pub struct ControllerManagerUnit {
    cluster_cidr: String,
    service_cidr: String,
}

impl ServiceUnit for ControllerManagerUnit {
    fn name(&self) -> &'static str {
        "kube-controller-manager"
    }

    fn configure(&mut self, spec: &ClusterSpec) -> Result<()> {
        self.cluster_cidr = spec.kubernetes.cluster_cidr.clone();
        self.service_cidr = spec.kubernetes.service_cidr.clone();
        Ok(())
    }

    fn deploy(&self, ctx: &mut NodeContext) -> Result<()> {
        info!(node = ctx.hostname, ip = ctx.ip, "deploying kube-controller-manager");
        ctx.channel.prep_dir(K8S_SSL_DIR, false)?;
        push_auth_file(ctx, auth::CA_KEY, K8S_SSL_DIR)?;
        push_binary(ctx, self.name())?;
        let unit = self.render_unit();
        stage_file(ctx, "kube-controller-manager.service", &unit, SYSTEMD_DIR)?;
        enable_unit(ctx, self.name())
    }
}

impl ControllerManagerUnit {
    fn render_unit(&self) -> String {
        format!(
            r#"[Unit]
Description=Kubernetes Controller Manager
After=kube-apiserver.service

[Service]
ExecStart=/usr/bin/kube-controller-manager \
  --master=http://127.0.0.1:8080 \
  --cluster-cidr={cluster_cidr} \
  --service-cluster-ip-range={service_cidr} \
  --cluster-signing-cert-file={ssl}ca.pem \
  --cluster-signing-key-file={ssl}ca-key.pem \
  --root-ca-file={ssl}ca.pem \
  --leader-elect=true \
  --allocate-node-cidrs=true
Restart=on-failure
RestartSec=5

[Install]
WantedBy=multi-user.target
"#,
            cluster_cidr = self.cluster_cidr,
            service_cidr = self.service_cidr,
            ssl = K8S_SSL_DIR,
        )
    }
}
