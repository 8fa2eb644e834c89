//! Node agent. Joins the cluster with the shared bootstrap token and
//! requests its own client certificate from the API server.

use anyhow::{Context, Result};
use tracing::info;

use super::{
    enable_unit, push_auth_file, push_binary, stage_file, NodeContext, ServiceUnit, K8S_DIR,
    K8S_SSL_DIR, SYSTEMD_DIR,
};
use crate::auth;
use crate::config::{ClusterSpec, Role};

pub const KUBELET_DATA_DIR: &str = "/var/lib/kubelet/";

#[derive(Default)]
pub struct KubeletUnit {
    api_server: String,
}

impl ServiceUnit for KubeletUnit {
    fn name(&self) -> &'static str {
        "kubelet"
    }

    fn configure(&mut self, spec: &ClusterSpec) -> Result<()> {
        let control = spec
            .nodes
            .iter()
            .find(|n| n.has_role(Role::Control))
            .context("kubelet requires at least one control node")?;
        self.api_server = format!("https://{}:6443", control.external_ip);
        Ok(())
    }

    fn deploy(&self, ctx: &mut NodeContext) -> Result<()> {
        info!(node = ctx.hostname, ip = ctx.ip, "deploying kubelet");

        ctx.channel.prep_dir(K8S_DIR, false)?;
        ctx.channel.prep_dir(K8S_SSL_DIR, false)?;
        ctx.channel.prep_dir(KUBELET_DATA_DIR, false)?;
        push_auth_file(ctx, auth::CA_CERT, K8S_SSL_DIR)?;
        push_binary(ctx, self.name())?;

        let bootstrap = self.render_bootstrap_kubeconfig(ctx)?;
        stage_file(ctx, "bootstrap.kubeconfig", &bootstrap, K8S_DIR)?;

        let unit = self.render_unit(ctx.ip, ctx.hostname);
        stage_file(ctx, "kubelet.service", &unit, SYSTEMD_DIR)?;
        enable_unit(ctx, self.name())
    }
}

impl KubeletUnit {
    /// The bootstrap kubeconfig carries only the shared token; the kubelet
    /// trades it for a real certificate on first contact.
    fn render_bootstrap_kubeconfig(&self, ctx: &NodeContext) -> Result<String> {
        let token_file = ctx.auth_dir.join(auth::BOOTSTRAP_TOKEN);
        let line = std::fs::read_to_string(&token_file)
            .with_context(|| format!("failed to read {}", token_file.display()))?;
        let token = line
            .split(',')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();

        Ok(format!(
            r#"apiVersion: v1
kind: Config
clusters:
- name: beacon
  cluster:
    certificate-authority: {ssl}ca.pem
    server: {server}
contexts:
- name: bootstrap
  context:
    cluster: beacon
    user: kubelet-bootstrap
current-context: bootstrap
users:
- name: kubelet-bootstrap
  user:
    token: {token}
"#,
            ssl = K8S_SSL_DIR,
            server = self.api_server,
        ))
    }

    fn render_unit(&self, ip: &str, hostname: &str) -> String {
        format!(
            r#"[Unit]
Description=Kubernetes Node Agent
After=docker.service
Requires=docker.service

[Service]
WorkingDirectory={data_dir}
ExecStart=/usr/bin/kubelet \
  --node-ip={ip} \
  --hostname-override={hostname} \
  --bootstrap-kubeconfig={k8s}bootstrap.kubeconfig \
  --kubeconfig={k8s}kubelet.kubeconfig \
  --cert-dir={ssl} \
  --fail-swap-on=false
Restart=on-failure
RestartSec=5

[Install]
WantedBy=multi-user.target
"#,
            data_dir = KUBELET_DATA_DIR,
            ip = ip,
            hostname = hostname,
            k8s = K8S_DIR,
            ssl = K8S_SSL_DIR,
        )
    }
}
