//! Storage tier unit — the distributed key-value store backing cluster
//! state, run as a container under systemd.

use anyhow::Result;
use tracing::info;

use super::{
    enable_unit, push_auth_file, stage_file, NodeContext, ServiceUnit, ETCD_CONTAINER,
    ETCD_SSL_DIR, SYSTEMD_DIR,
};
use crate::auth;
use crate::config::{ClusterSpec, Role};

pub const ETCD_DATA_DIR: &str = "/var/lib/etcd/";
const ETCD_IMAGE: &str = "quay.io/coreos/etcd:v3.5.9";

#[derive(Default)]
pub struct EtcdUnit {
    /// `name=https://ip:2380` for every storage node, in spec order.
    initial_cluster: String,
}

impl ServiceUnit for EtcdUnit {
    fn name(&self) -> &'static str {
        "etcd"
    }

    fn configure(&mut self, spec: &ClusterSpec) -> Result<()> {
        self.initial_cluster = spec
            .nodes
            .iter()
            .filter(|n| n.has_role(Role::Storage))
            .map(|n| format!("{}=https://{}:2380", n.hostname, n.external_ip))
            .collect::<Vec<_>>()
            .join(",");
        Ok(())
    }

    fn deploy(&self, ctx: &mut NodeContext) -> Result<()> {
        info!(node = ctx.hostname, ip = ctx.ip, "deploying etcd");

        ctx.channel.prep_dir(ETCD_SSL_DIR, false)?;
        ctx.channel.prep_dir(ETCD_DATA_DIR, false)?;
        push_auth_file(ctx, auth::CA_CERT, ETCD_SSL_DIR)?;
        push_auth_file(ctx, auth::ETCD_CERT, ETCD_SSL_DIR)?;
        push_auth_file(ctx, auth::ETCD_KEY, ETCD_SSL_DIR)?;

        let unit = self.render_unit(ctx.hostname, ctx.ip);
        stage_file(ctx, "etcd.service", &unit, SYSTEMD_DIR)?;
        enable_unit(ctx, self.name())
    }
}

impl EtcdUnit {
    fn render_unit(&self, hostname: &str, ip: &str) -> String {
        format!(
            r#"[Unit]
Description=etcd key-value store
After=docker.service
Requires=docker.service

[Service]
ExecStartPre=-/usr/bin/docker rm -f {container}
ExecStart=/usr/bin/docker run --rm --name {container} \
  --net host \
  -v {data_dir}:{data_dir} \
  -v {ssl_dir}:{ssl_dir} \
  {image} /usr/local/bin/etcd \
  --name {hostname} \
  --data-dir {data_dir} \
  --cert-file {ssl_dir}etcd.pem \
  --key-file {ssl_dir}etcd-key.pem \
  --trusted-ca-file {ssl_dir}ca.pem \
  --peer-cert-file {ssl_dir}etcd.pem \
  --peer-key-file {ssl_dir}etcd-key.pem \
  --peer-trusted-ca-file {ssl_dir}ca.pem \
  --listen-client-urls https://{ip}:2379,http://127.0.0.1:2379 \
  --advertise-client-urls https://{ip}:2379 \
  --listen-peer-urls https://{ip}:2380 \
  --initial-advertise-peer-urls https://{ip}:2380 \
  --initial-cluster {initial_cluster} \
  --initial-cluster-state new
ExecStop=/usr/bin/docker stop {container}
Restart=on-failure
RestartSec=5

[Install]
WantedBy=multi-user.target
"#,
            container = ETCD_CONTAINER,
            data_dir = ETCD_DATA_DIR,
            ssl_dir = ETCD_SSL_DIR,
            image = ETCD_IMAGE,
            hostname = hostname,
            ip = ip,
            initial_cluster = self.initial_cluster,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::config::{BinarySpec, NodeSpec};

    fn spec() -> ClusterSpec {
        let storage = |ip: &str, name: &str| NodeSpec {
            external_ip: ip.to_string(),
            ssh_user: "root".to_string(),
            ssh_password: String::new(),
            hostname: name.to_string(),
            role: BTreeSet::from([Role::Storage]),
        };
        let worker = NodeSpec {
            external_ip: "10.0.0.9".to_string(),
            ssh_user: "root".to_string(),
            ssh_password: String::new(),
            hostname: "w1".to_string(),
            role: BTreeSet::from([Role::Worker]),
        };
        ClusterSpec {
            nodes: vec![storage("10.0.0.1", "s1"), worker, storage("10.0.0.2", "s2")],
            binaries: BinarySpec {
                list: vec![],
                redownload: "no".to_string(),
                download_url: None,
                path: "/tmp/bin".to_string(),
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
    fn initial_cluster_lists_storage_nodes_in_spec_order() {
        let mut unit = EtcdUnit::default();
        unit.configure(&spec()).expect("configure");
        assert_eq!(
            unit.initial_cluster,
            "s1=https://10.0.0.1:2380,s2=https://10.0.0.2:2380"
        );
    }

    #[test]
    fn rendered_unit_binds_member_identity_to_the_node() {
        let mut unit = EtcdUnit::default();
        unit.configure(&spec()).expect("configure");
        let rendered = unit.render_unit("s2", "10.0.0.2");
        assert!(rendered.contains("--name s2"));
        assert!(rendered.contains("--listen-peer-urls https://10.0.0.2:2380"));
        assert!(rendered.contains("--initial-cluster s1=https://10.0.0.1:2380,s2=https://10.0.0.2:2380"));
        assert!(rendered.contains(ETCD_CONTAINER));
    }
}
