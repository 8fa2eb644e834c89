//! Role topology — partitions the node list into (possibly overlapping)
//! tier subsequences, preserving spec order within each tier.

use crate::config::{ClusterSpec, NodeSpec, Role};
use crate::error::DeployError;

#[derive(Debug)]
pub struct Topology<'a> {
    pub storage: Vec<&'a NodeSpec>,
    pub control: Vec<&'a NodeSpec>,
    pub worker: Vec<&'a NodeSpec>,
}

impl<'a> Topology<'a> {
    /// A viable cluster needs at least one storage node and one control
    /// node; anything less is a config error, not a runtime failure.
    pub fn resolve(spec: &'a ClusterSpec) -> Result<Self, DeployError> {
        let mut storage = Vec::new();
        let mut control = Vec::new();
        let mut worker = Vec::new();

        for node in &spec.nodes {
            if node.has_role(Role::Storage) {
                storage.push(node);
            }
            if node.has_role(Role::Control) {
                control.push(node);
            }
            if node.has_role(Role::Worker) {
                worker.push(node);
            }
        }

        if storage.is_empty() || control.is_empty() {
            return Err(DeployError::config(
                "cluster needs at least 1 storage node and 1 control node",
            ));
        }

        Ok(Self {
            storage,
            control,
            worker,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::config::BinarySpec;

    fn spec(roles: &[&[Role]]) -> ClusterSpec {
        ClusterSpec {
            nodes: roles
                .iter()
                .enumerate()
                .map(|(i, r)| NodeSpec {
                    external_ip: format!("10.0.0.{}", i + 1),
                    ssh_user: "root".to_string(),
                    ssh_password: String::new(),
                    hostname: format!("node-{}", i + 1),
                    role: r.iter().copied().collect::<BTreeSet<_>>(),
                })
                .collect(),
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
    fn overlapping_roles_land_in_every_matching_tier() {
        let spec = spec(&[
            &[Role::Storage, Role::Control],
            &[Role::Worker],
            &[Role::Control, Role::Worker],
        ]);
        let topo = Topology::resolve(&spec).expect("resolve should succeed");
        assert_eq!(topo.storage.len(), 1);
        assert_eq!(topo.control.len(), 2);
        assert_eq!(topo.worker.len(), 2);
        // input order preserved within each tier
        assert_eq!(topo.control[0].hostname, "node-1");
        assert_eq!(topo.control[1].hostname, "node-3");
    }

    #[test]
    fn missing_storage_tier_is_a_config_error() {
        let spec = spec(&[&[Role::Control], &[Role::Worker]]);
        let err = Topology::resolve(&spec).expect_err("must fail");
        assert!(matches!(err, DeployError::Config { .. }));
    }

    #[test]
    fn missing_control_tier_is_a_config_error() {
        let spec = spec(&[&[Role::Storage], &[Role::Worker]]);
        let err = Topology::resolve(&spec).expect_err("must fail");
        assert!(matches!(err, DeployError::Config { .. }));
    }
}
