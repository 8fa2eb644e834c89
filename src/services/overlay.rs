//! Overlay-network plugin, applied as a manifest through the cluster API
//! from the first control node. Unlike the systemd-managed units, health is
//! judged by whether the apply itself went through.

use anyhow::Result;
use tracing::info;

use super::{stage_file, NodeContext, ServiceUnit, K8S_DIR};
use crate::config::{ClusterSpec, Role};

const MANIFEST_NAME: &str = "calico.yaml";

#[derive(Default)]
pub struct CalicoUnit {
    pool_cidr: String,
    etcd_endpoints: String,
}

impl ServiceUnit for CalicoUnit {
    fn name(&self) -> &'static str {
        "calico"
    }

    fn configure(&mut self, spec: &ClusterSpec) -> Result<()> {
        self.pool_cidr = spec.kubernetes.cluster_cidr.clone();
        self.etcd_endpoints = spec
            .nodes
            .iter()
            .filter(|n| n.has_role(Role::Storage))
            .map(|n| format!("https://{}:2379", n.external_ip))
            .collect::<Vec<_>>()
            .join(",");
        Ok(())
    }

    fn deploy(&self, ctx: &mut NodeContext) -> Result<()> {
        info!(node = ctx.hostname, ip = ctx.ip, "staging overlay manifest");
        ctx.channel.prep_dir(K8S_DIR, false)?;
        let manifest = self.render_manifest();
        stage_file(ctx, MANIFEST_NAME, &manifest, K8S_DIR)
    }

    fn start(&self, ctx: &mut NodeContext) -> Result<bool> {
        let out = ctx.channel.execute(&format!(
            "kubectl --kubeconfig /root/.kube/config apply -f {K8S_DIR}{MANIFEST_NAME}"
        ))?;
        Ok(!out
            .iter()
            .any(|l| l.contains("error") || l.contains("Error")))
    }

    fn stop(&self, ctx: &mut NodeContext) -> Result<()> {
        ctx.channel.execute(&format!(
            "kubectl --kubeconfig /root/.kube/config delete -f {K8S_DIR}{MANIFEST_NAME} --ignore-not-found"
        ))?;
        Ok(())
    }
}

impl CalicoUnit {
    fn render_manifest(&self) -> String {
        format!(
            r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: calico-config
  namespace: kube-system
data:
  etcd_endpoints: "{endpoints}"
  calico_backend: "bird"
  ipv4_pool_cidr: "{cidr}"
---
apiVersion: apps/v1
kind: DaemonSet
metadata:
  name: calico-node
  namespace: kube-system
spec:
  selector:
    matchLabels:
      k8s-app: calico-node
  template:
    metadata:
      labels:
        k8s-app: calico-node
    spec:
      hostNetwork: true
      tolerations:
        - operator: Exists
      containers:
        - name: calico-node
          image: calico/node:v3.26.1
          env:
            - name: ETCD_ENDPOINTS
              valueFrom:
                configMapKeyRef:
                  name: calico-config
                  key: etcd_endpoints
            - name: CALICO_IPV4POOL_CIDR
              valueFrom:
                configMapKeyRef:
                  name: calico-config
                  key: ipv4_pool_cidr
"#,
            endpoints = self.etcd_endpoints,
            cidr = self.pool_cidr,
        )
    }
}
