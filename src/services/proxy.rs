//! Network proxy for workload traffic.

use anyhow::Result;
use tracing::info;

use super::{
    enable_unit, push_auth_file, push_binary, stage_file, NodeContext, ServiceUnit, K8S_DIR,
    SYSTEMD_DIR,
};
use crate::auth;
use crate::config::ClusterSpec;

#[derive(Default)]
pub struct ProxyUnit {
    cluster_cidr: String,
}

impl ServiceUnit for ProxyUnit {
    fn name(&self) -> &'static str {
        "kube-proxy"
    }

    fn configure(&mut self, spec: &ClusterSpec) -> Result<()> {
        self.cluster_cidr = spec.kubernetes.cluster_cidr.clone();
        Ok(())
    }

    fn deploy(&self, ctx: &mut NodeContext) -> Result<()> {
        info!(node = ctx.hostname, ip = ctx.ip, "deploying kube-proxy");

        ctx.channel.prep_dir(K8S_DIR, false)?;
        push_binary(ctx, self.name())?;
        push_auth_file(ctx, auth::ADMIN_KUBECONFIG, K8S_DIR)?;

        let unit = self.render_unit(ctx.ip, ctx.hostname);
        stage_file(ctx, "kube-proxy.service", &unit, SYSTEMD_DIR)?;
        enable_unit(ctx, self.name())
    }
}

impl ProxyUnit {
    fn render_unit(&self, ip: &str, hostname: &str) -> String {
        format!(
            r#"[Unit]
Description=Kubernetes Network Proxy
After=network.target

[Service]
ExecStart=/usr/bin/kube-proxy \
  --bind-address={ip} \
  --hostname-override={hostname} \
  --cluster-cidr={cluster_cidr} \
  --kubeconfig={k8s}admin.kubeconfig \
  --proxy-mode=iptables
Restart=on-failure
RestartSec=5

[Install]
WantedBy=multi-user.target
"#,
            ip = ip,
            hostname = hostname,
            cluster_cidr = self.cluster_cidr,
            k8s = K8S_DIR,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_unit_carries_cluster_cidr_and_node_identity() {
        let unit = ProxyUnit {
            cluster_cidr: "172.20.0.0/16".to_string(),
        };
        let rendered = unit.render_unit("10.0.0.7", "w2");
        assert!(rendered.contains("--cluster-cidr=172.20.0.0/16"));
        assert!(rendered.contains("--bind-address=10.0.0.7"));
        assert!(rendered.contains("--hostname-override=w2"));
    }
}
