//! Orchestrator entrypoints — deploy, add-host, reset.
//!
//! Each entrypoint composes the topology resolver, the environment
//! validator, and the phase executor over the same collaborator seams.
//! Partial rollout failures come back as a report; only a structurally
//! invalid spec, a failed precheck, or a missing staged binary abort early.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use super::executor::{PhaseExecutor, WorkDirs};
use super::precheck::EnvironmentValidator;
use super::report::ClusterReport;
use super::topology::Topology;
use crate::auth::{self, CertificateAuthority, ClusterApi};
use crate::binaries;
use crate::config::ClusterSpec;
use crate::error::DeployError;
use crate::remote::ChannelFactory;
use crate::services::ServiceCatalog;

pub struct Orchestrator<'a> {
    spec: &'a ClusterSpec,
    channels: Arc<dyn ChannelFactory>,
    ca: &'a dyn CertificateAuthority,
    api: &'a dyn ClusterApi,
    dirs: WorkDirs,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        spec: &'a ClusterSpec,
        channels: Arc<dyn ChannelFactory>,
        ca: &'a dyn CertificateAuthority,
        api: &'a dyn ClusterApi,
    ) -> Self {
        let dirs = WorkDirs::new(Path::new(WorkDirs::DEFAULT_ROOT), spec.staging_dir());
        Self {
            spec,
            channels,
            ca,
            api,
            dirs,
        }
    }

    /// Relocate the local working directories (tests, non-root runs).
    pub fn with_work_root(mut self, root: &Path) -> Self {
        self.dirs = WorkDirs::new(root, self.spec.staging_dir());
        self
    }

    /// Full deployment: strict precheck, binary staging, PKI generation,
    /// then the phased rollout.
    pub fn deploy(&self) -> Result<ClusterReport, DeployError> {
        self.spec.validate()?;
        let topology = Topology::resolve(self.spec)?;

        info!("starting environment precheck");
        EnvironmentValidator::new(self.spec, Arc::clone(&self.channels)).run(true)?;
        info!("environment precheck passed");

        self.dirs
            .prepare(true)
            .context("failed to prepare local working directories")?;
        binaries::prepare(self.spec)?;

        self.ca.generate_ca_cert(&self.dirs.auth)?;
        self.ca.generate_bootstrap_token(&self.dirs.auth)?;
        self.ca.generate_etcd_cert(&self.dirs.auth, self.spec)?;
        self.ca.generate_apiserver_cert(&self.dirs.auth, self.spec)?;
        self.ca.generate_admin_kubeconfig(&self.dirs.auth, self.spec)?;

        let catalog = ServiceCatalog::configure(self.spec)?;
        let executor =
            PhaseExecutor::new(&catalog, Arc::clone(&self.channels), self.api, &self.dirs);
        let report = executor.run_rollout(&topology, true);

        // Best-effort: keeps a recovery copy of the PKI material inside the
        // cluster for later add-host runs.
        if let Err(e) = self.api.save_cert_backup(&self.dirs.auth) {
            warn!(error = %e, "failed to save certificate backup secret");
        }

        Ok(report)
    }

    /// Extend a live cluster: control and worker phases only, storage
    /// membership is not re-evaluated.
    pub fn add_host(&self) -> Result<ClusterReport, DeployError> {
        self.spec.validate()?;

        // Fail closed: extending a cluster is impossible without its admin
        // credential.
        let admin_path = self
            .spec
            .admin_kubeconfig
            .as_deref()
            .ok_or_else(|| DeployError::config("admin_kubeconfig path is not configured"))?;
        let admin = std::fs::read(admin_path).map_err(|e| {
            DeployError::config(format!("admin kubeconfig '{admin_path}' is not readable: {e}"))
        })?;

        let topology = Topology::resolve(self.spec)?;

        info!("starting environment precheck (leftover state is informational)");
        EnvironmentValidator::new(self.spec, Arc::clone(&self.channels)).run(false)?;

        self.dirs
            .prepare(false)
            .context("failed to prepare local working directories")?;
        std::fs::write(self.dirs.auth.join(auth::ADMIN_KUBECONFIG), admin)
            .context("failed to stage admin kubeconfig")?;

        // When the deploy host has lost its local PKI material, pull it back
        // out of the cluster secret written at deploy time.
        let missing_certs = [auth::CA_CERT, auth::SERVER_CERT, auth::SERVER_KEY]
            .iter()
            .any(|f| !self.dirs.auth.join(f).is_file());
        if missing_certs {
            info!("local certificate material incomplete, recovering from cluster secret");
            self.api.recover_cert_backup(&self.dirs.auth)?;
        }
        if !self.dirs.auth.join(auth::BOOTSTRAP_TOKEN).is_file() {
            self.ca.generate_bootstrap_token(&self.dirs.auth)?;
        }

        binaries::prepare(self.spec)?;

        let catalog = ServiceCatalog::configure(self.spec)?;
        let executor =
            PhaseExecutor::new(&catalog, Arc::clone(&self.channels), self.api, &self.dirs);
        Ok(executor.run_rollout(&topology, false))
    }

    /// Tear down the previous deployment. With `clear`, node state
    /// directories are removed; storage data is always renamed aside
    /// instead of deleted.
    pub fn reset(&self, clear: bool) -> Result<(), DeployError> {
        self.spec.validate()?;
        let topology = Topology::resolve(self.spec)?;

        info!(clear, "starting cluster teardown");
        let catalog = ServiceCatalog::configure(self.spec)?;
        let executor =
            PhaseExecutor::new(&catalog, Arc::clone(&self.channels), self.api, &self.dirs);
        executor.run_teardown(&topology, clear);
        info!("clean-up finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::Path;

    use super::*;
    use crate::auth::mock::{MockApi, MockCa};
    use crate::cluster::report::Verdict;
    use crate::config::{BinarySpec, NodeSpec, Role};
    use crate::remote::mock::MockFactory;

    fn node(ip: &str, name: &str, roles: &[Role]) -> NodeSpec {
        NodeSpec {
            external_ip: ip.to_string(),
            ssh_user: "root".to_string(),
            ssh_password: String::new(),
            hostname: name.to_string(),
            role: roles.iter().copied().collect::<BTreeSet<_>>(),
        }
    }

    fn spec(staging: &Path) -> ClusterSpec {
        ClusterSpec {
            nodes: vec![
                node("10.0.0.1", "s1", &[Role::Storage]),
                node("10.0.0.2", "c1", &[Role::Control]),
                node("10.0.0.3", "c2", &[Role::Control]),
                node("10.0.0.4", "w1", &[Role::Worker]),
                node("10.0.0.5", "w2", &[Role::Worker]),
                node("10.0.0.6", "w3", &[Role::Worker]),
            ],
            binaries: BinarySpec {
                list: vec![],
                redownload: "no".to_string(),
                download_url: None,
                path: staging.display().to_string(),
                sha256: Default::default(),
            },
            cni: Default::default(),
            kubernetes: Default::default(),
            runtime: Default::default(),
            log_level: "info".to_string(),
            admin_kubeconfig: None,
        }
    }

    struct Harness {
        factory: MockFactory,
        ca: MockCa,
        api: MockApi,
        work: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                factory: MockFactory::new(),
                ca: MockCa::default(),
                api: MockApi::default(),
                work: tempfile::tempdir().expect("tempdir"),
            }
        }

        fn orchestrator<'a>(&'a self, spec: &'a ClusterSpec) -> Orchestrator<'a> {
            Orchestrator::new(spec, Arc::new(self.factory.clone()), &self.ca, &self.api)
                .with_work_root(self.work.path())
        }
    }

    #[test]
    fn deploy_rolls_out_all_six_nodes() {
        let h = Harness::new();
        let spec = spec(&h.work.path().join("staging"));
        std::fs::create_dir_all(spec.staging_dir()).unwrap();

        let report = h.orchestrator(&spec).deploy().expect("deploy should succeed");

        assert_eq!(report.summary, Verdict::Success);
        assert_eq!(report.nodes.len(), 6);
        // full PKI generated before the rollout
        assert_eq!(
            *h.ca.calls.lock().unwrap(),
            vec![
                "ca_cert",
                "bootstrap_token",
                "etcd_cert",
                "apiserver_cert",
                "admin_kubeconfig"
            ]
        );
        assert!(*h.api.saved_backup.lock().unwrap());
    }

    #[test]
    fn deploy_aborts_on_failed_precheck_without_touching_nodes() {
        let h = Harness::new();
        let spec = spec(&h.work.path().join("staging"));
        std::fs::create_dir_all(spec.staging_dir()).unwrap();
        h.factory.respond("10.0.0.1", "getenforce", &["Enforcing"]);

        let err = h.orchestrator(&spec).deploy().expect_err("precheck must fail");
        assert!(matches!(err, DeployError::Precheck { .. }));
        assert!(!h.factory.executed("", "systemctl restart"));
        assert!(h.ca.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn deploy_aborts_on_missing_staged_binary() {
        let h = Harness::new();
        let mut spec = spec(&h.work.path().join("staging"));
        std::fs::create_dir_all(spec.staging_dir()).unwrap();
        spec.binaries.list = vec!["kube-apiserver".to_string()];

        let err = h.orchestrator(&spec).deploy().expect_err("must fail");
        assert!(matches!(err, DeployError::BinaryNotFound { .. }));
    }

    #[test]
    fn deploy_rejects_malformed_provisioning_mode() {
        let h = Harness::new();
        let mut spec = spec(&h.work.path().join("staging"));
        std::fs::create_dir_all(spec.staging_dir()).unwrap();
        spec.binaries.redownload = "sometimes".to_string();

        let err = h.orchestrator(&spec).deploy().expect_err("must fail");
        assert!(matches!(err, DeployError::Config { .. }));
    }

    #[test]
    fn add_host_fails_closed_without_admin_credential() {
        let h = Harness::new();
        let spec = spec(&h.work.path().join("staging"));

        let err = h.orchestrator(&spec).add_host().expect_err("must fail");
        assert!(matches!(err, DeployError::Config { .. }));
    }

    #[test]
    fn add_host_fails_closed_on_unreadable_admin_credential() {
        let h = Harness::new();
        let mut spec = spec(&h.work.path().join("staging"));
        spec.admin_kubeconfig = Some(
            h.work
                .path()
                .join("missing.kubeconfig")
                .display()
                .to_string(),
        );

        let err = h.orchestrator(&spec).add_host().expect_err("must fail");
        assert!(matches!(err, DeployError::Config { .. }));
    }

    #[test]
    fn add_host_recovers_certs_and_skips_the_storage_phase() {
        let h = Harness::new();
        let mut spec = spec(&h.work.path().join("staging"));
        std::fs::create_dir_all(spec.staging_dir()).unwrap();
        let admin = h.work.path().join("admin.kubeconfig");
        std::fs::write(&admin, b"kubeconfig").unwrap();
        spec.admin_kubeconfig = Some(admin.display().to_string());

        let report = h
            .orchestrator(&spec)
            .add_host()
            .expect("add-host should succeed");

        // 2 control + 3 worker entries; the storage phase never ran
        assert_eq!(report.nodes.len(), 5);
        assert_eq!(report.summary, Verdict::Success);
        assert!(!h.factory.executed("", "systemctl restart etcd"));
        assert!(*h.api.recovered.lock().unwrap());
    }

    #[test]
    fn reset_stops_and_disables_units_on_every_tier() {
        let h = Harness::new();
        let spec = spec(&h.work.path().join("staging"));

        h.orchestrator(&spec).reset(false).expect("reset should succeed");

        assert!(h.factory.executed("10.0.0.2", "systemctl stop kube-apiserver"));
        assert!(h.factory.executed("10.0.0.1", "systemctl stop etcd"));
        assert!(h.factory.executed("10.0.0.4", "systemctl stop kubelet"));
        assert!(!h.factory.executed("", "rm -rf /var/lib/kubelet/"));
    }
}
