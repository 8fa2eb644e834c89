//! API front end of the control plane.

use anyhow::Result;
use tracing::info;

use super::{
    enable_unit, push_auth_file, push_binary, stage_file, NodeContext, ServiceUnit, K8S_SSL_DIR,
    SYSTEMD_DIR,
};
use crate::auth;
use crate::config::{ClusterSpec, Role};

#[derive(Default)]
pub struct ApiserverUnit {
    etcd_endpoints: String,
    service_cidr: String,
}

impl ServiceUnit for ApiserverUnit {
    fn name(&self) -> &'static str {
        "kube-apiserver"
    }

    fn configure(&mut self, spec: &ClusterSpec) -> Result<()> {
        self.etcd_endpoints = spec
            .nodes
            .iter()
            .filter(|n| n.has_role(Role::Storage))
            .map(|n| format!("https://{}:2379", n.external_ip))
            .collect::<Vec<_>>()
            .join(",");
        self.service_cidr = spec.kubernetes.service_cidr.clone();
        Ok(())
    }

    fn deploy(&self, ctx: &mut NodeContext) -> Result<()> {
        info!(node = ctx.hostname, ip = ctx.ip, "deploying kube-apiserver");

        ctx.channel.prep_dir(K8S_SSL_DIR, false)?;
        push_auth_file(ctx, auth::CA_CERT, K8S_SSL_DIR)?;
        push_auth_file(ctx, auth::SERVER_CERT, K8S_SSL_DIR)?;
        push_auth_file(ctx, auth::SERVER_KEY, K8S_SSL_DIR)?;
        push_auth_file(ctx, auth::BOOTSTRAP_TOKEN, K8S_SSL_DIR)?;
        push_binary(ctx, self.name())?;

        let unit = self.render_unit(ctx.ip);
        stage_file(ctx, "kube-apiserver.service", &unit, SYSTEMD_DIR)?;
        enable_unit(ctx, self.name())
    }
}

impl ApiserverUnit {
    fn render_unit(&self, ip: &str) -> String {
        format!(
            r#"[Unit]
Description=Kubernetes API Server
After=network.target

[Service]
ExecStart=/usr/bin/kube-apiserver \
  --advertise-address={ip} \
  --bind-address={ip} \
  --secure-port=6443 \
  --etcd-servers={endpoints} \
  --etcd-cafile={ssl}ca.pem \
  --etcd-certfile={ssl}kubernetes.pem \
  --etcd-keyfile={ssl}kubernetes-key.pem \
  --service-cluster-ip-range={service_cidr} \
  --tls-cert-file={ssl}kubernetes.pem \
  --tls-private-key-file={ssl}kubernetes-key.pem \
  --client-ca-file={ssl}ca.pem \
  --token-auth-file={ssl}token.csv \
  --enable-bootstrap-token-auth \
  --allow-privileged=true \
  --authorization-mode=Node,RBAC
Restart=on-failure
RestartSec=5
Type=notify

[Install]
WantedBy=multi-user.target
"#,
            ip = ip,
            endpoints = self.etcd_endpoints,
            ssl = K8S_SSL_DIR,
            service_cidr = self.service_cidr,
        )
    }
}
