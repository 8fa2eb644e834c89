//! Certificate material and live-cluster access.
//!
//! Both concerns are external collaborators of the orchestrator and sit
//! behind traits: `CertificateAuthority` issues the PKI material into the
//! local auth dir, `ClusterApi` talks to an already-running cluster through
//! the local `kubectl`. The orchestrator composes them but contains none of
//! this plumbing itself.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use tracing::info;

use crate::config::{ClusterSpec, Role};
use crate::tools;

pub const CA_CERT: &str = "ca.pem";
pub const CA_KEY: &str = "ca-key.pem";
pub const SERVER_CERT: &str = "kubernetes.pem";
pub const SERVER_KEY: &str = "kubernetes-key.pem";
pub const ETCD_CERT: &str = "etcd.pem";
pub const ETCD_KEY: &str = "etcd-key.pem";
pub const ADMIN_KUBECONFIG: &str = "admin.kubeconfig";
pub const BOOTSTRAP_TOKEN: &str = "token.csv";

/// Name of the in-cluster secret holding the CA cert, server cert and key.
pub const CERT_BACKUP_SECRET: &str = "k8s-cert-bak";

pub trait CertificateAuthority {
    fn generate_ca_cert(&self, dir: &Path) -> Result<()>;
    fn generate_bootstrap_token(&self, dir: &Path) -> Result<()>;
    fn generate_etcd_cert(&self, dir: &Path, spec: &ClusterSpec) -> Result<()>;
    fn generate_apiserver_cert(&self, dir: &Path, spec: &ClusterSpec) -> Result<()>;
    fn generate_admin_kubeconfig(&self, dir: &Path, spec: &ClusterSpec) -> Result<()>;
}

/// Access to a live cluster's control API from the deploy host.
pub trait ClusterApi {
    fn label_control_node(&self, ip: &str) -> Result<()>;
    fn save_cert_backup(&self, auth_dir: &Path) -> Result<()>;
    fn recover_cert_backup(&self, auth_dir: &Path) -> Result<()>;
}

// ── OpenSSL-backed CA ──────────────────────────────────────

pub struct OpensslCa;

impl OpensslCa {
    fn generate_signed_pair(
        &self,
        dir: &Path,
        cn: &str,
        san: &str,
        cert_file: &str,
        key_file: &str,
    ) -> Result<()> {
        let key = dir.join(key_file);
        let csr = dir.join(format!("{cn}.csr"));
        let ext = dir.join(format!("{cn}.ext"));
        let cert = dir.join(cert_file);

        tools::run("openssl", &["genrsa", "-out", &path_str(&key), "2048"])?;
        tools::run(
            "openssl",
            &[
                "req", "-new", "-key", &path_str(&key),
                "-subj", &format!("/CN={cn}"),
                "-out", &path_str(&csr),
            ],
        )?;
        std::fs::write(&ext, format!("subjectAltName={san}\n"))
            .with_context(|| format!("failed to write {}", ext.display()))?;
        tools::run(
            "openssl",
            &[
                "x509", "-req", "-in", &path_str(&csr),
                "-CA", &path_str(&dir.join(CA_CERT)),
                "-CAkey", &path_str(&dir.join(CA_KEY)),
                "-CAcreateserial",
                "-days", "3650",
                "-extfile", &path_str(&ext),
                "-out", &path_str(&cert),
            ],
        )?;
        Ok(())
    }
}

fn path_str(p: &Path) -> String {
    p.display().to_string()
}

impl CertificateAuthority for OpensslCa {
    fn generate_ca_cert(&self, dir: &Path) -> Result<()> {
        let key = dir.join(CA_KEY);
        let cert = dir.join(CA_CERT);
        tools::run("openssl", &["genrsa", "-out", &path_str(&key), "2048"])?;
        tools::run(
            "openssl",
            &[
                "req", "-x509", "-new", "-nodes",
                "-key", &path_str(&key),
                "-subj", "/CN=beacon-ca",
                "-days", "3650",
                "-out", &path_str(&cert),
            ],
        )?;
        info!(dir = %dir.display(), "generated cluster CA");
        Ok(())
    }

    fn generate_bootstrap_token(&self, dir: &Path) -> Result<()> {
        let token = bootstrap_token();
        let line = format!("{token},kubelet-bootstrap,10001,\"system:kubelet-bootstrap\"\n");
        let path = dir.join(BOOTSTRAP_TOKEN);
        std::fs::write(&path, line)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    fn generate_etcd_cert(&self, dir: &Path, spec: &ClusterSpec) -> Result<()> {
        let san = san_for_role(spec, Role::Storage);
        self.generate_signed_pair(dir, "etcd", &san, ETCD_CERT, ETCD_KEY)
    }

    fn generate_apiserver_cert(&self, dir: &Path, spec: &ClusterSpec) -> Result<()> {
        let mut san = san_for_role(spec, Role::Control);
        san.push_str(",IP:127.0.0.1,DNS:kubernetes,DNS:kubernetes.default");
        self.generate_signed_pair(dir, "kubernetes", &san, SERVER_CERT, SERVER_KEY)
    }

    fn generate_admin_kubeconfig(&self, dir: &Path, spec: &ClusterSpec) -> Result<()> {
        let server = spec
            .nodes
            .iter()
            .find(|n| n.has_role(Role::Control))
            .map(|n| n.external_ip.as_str())
            .unwrap_or("127.0.0.1");
        let ca = std::fs::read(dir.join(CA_CERT))
            .with_context(|| format!("failed to read {CA_CERT} from {}", dir.display()))?;
        let content = render_admin_kubeconfig(server, &BASE64.encode(ca));
        let path = dir.join(ADMIN_KUBECONFIG);
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(server, "generated admin kubeconfig");
        Ok(())
    }
}

fn bootstrap_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn san_for_role(spec: &ClusterSpec, role: Role) -> String {
    spec.nodes
        .iter()
        .filter(|n| n.has_role(role))
        .map(|n| format!("IP:{}", n.external_ip))
        .collect::<Vec<_>>()
        .join(",")
}

fn render_admin_kubeconfig(server: &str, ca_b64: &str) -> String {
    format!(
        r#"apiVersion: v1
kind: Config
clusters:
- name: beacon
  cluster:
    server: https://{server}:6443
    certificate-authority-data: {ca_b64}
contexts:
- name: beacon-admin
  context:
    cluster: beacon
    user: admin
current-context: beacon-admin
users:
- name: admin
  user: {{}}
"#
    )
}

// ── kubectl-backed cluster API ─────────────────────────────

pub struct KubectlApi {
    /// Fallback location when kubectl is not yet installed system-wide:
    /// the binary staging dir populated before the rollout.
    staging: Option<PathBuf>,
}

impl KubectlApi {
    pub fn new(staging: Option<PathBuf>) -> Self {
        Self { staging }
    }

    fn kubectl(&self) -> Result<String> {
        if let Some(found) = tools::find("kubectl") {
            return Ok(found.display().to_string());
        }
        if let Some(staged) = self.staging.as_ref().map(|d| d.join("kubectl")) {
            if staged.is_file() {
                return Ok(staged.display().to_string());
            }
        }
        anyhow::bail!("kubectl not found on PATH or in the staging dir")
    }
}

impl ClusterApi for KubectlApi {
    fn label_control_node(&self, ip: &str) -> Result<()> {
        let kubectl = self.kubectl()?;
        tools::run(
            &kubectl,
            &[
                "label",
                "node",
                ip,
                "node-role.kubernetes.io/master=",
                "--overwrite",
            ],
        )
    }

    fn save_cert_backup(&self, auth_dir: &Path) -> Result<()> {
        let kubectl = self.kubectl()?;
        tools::run(
            &kubectl,
            &[
                "-n",
                "kube-system",
                "create",
                "secret",
                "generic",
                CERT_BACKUP_SECRET,
                &format!("--from-file=ca={}", path_str(&auth_dir.join(CA_CERT))),
                &format!("--from-file=cert={}", path_str(&auth_dir.join(SERVER_CERT))),
                &format!("--from-file=key={}", path_str(&auth_dir.join(SERVER_KEY))),
            ],
        )
    }

    fn recover_cert_backup(&self, auth_dir: &Path) -> Result<()> {
        let kubectl = self.kubectl()?;
        let raw = tools::output(
            &kubectl,
            &[
                "-n",
                "kube-system",
                "get",
                "secret",
                CERT_BACKUP_SECRET,
                "-o",
                "json",
            ],
        )?;
        write_recovered_certs(auth_dir, &raw)
    }
}

/// Decode the three cert blobs out of a `kubectl get secret -o json` payload
/// and write them into the auth dir.
fn write_recovered_certs(auth_dir: &Path, secret_json: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(secret_json).context("cert backup secret is not valid JSON")?;
    let data = value
        .get("data")
        .and_then(|d| d.as_object())
        .context("cert backup secret has no data section")?;

    for (key, file) in [("ca", CA_CERT), ("cert", SERVER_CERT), ("key", SERVER_KEY)] {
        let blob = data
            .get(key)
            .and_then(|v| v.as_str())
            .with_context(|| format!("cert backup secret is missing '{key}'"))?;
        let bytes = BASE64
            .decode(blob)
            .with_context(|| format!("cert backup entry '{key}' is not valid base64"))?;
        let path = auth_dir.join(file);
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    info!(dir = %auth_dir.display(), "recovered certificate material from cluster secret");
    Ok(())
}

#[cfg(test)]
pub mod mock {
    //! Recording doubles for the CA and cluster API.

    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use anyhow::Result;

    use super::{CertificateAuthority, ClusterApi};
    use crate::config::ClusterSpec;

    #[derive(Clone, Default)]
    pub struct MockCa {
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    impl MockCa {
        fn record(&self, what: &str, dir: &Path) {
            self.calls.lock().unwrap().push(what.to_string());
            let _ = std::fs::create_dir_all(dir);
        }

        fn touch(&self, dir: &Path, files: &[&str]) {
            for f in files {
                let _ = std::fs::write(dir.join(f), b"mock");
            }
        }
    }

    impl CertificateAuthority for MockCa {
        fn generate_ca_cert(&self, dir: &Path) -> Result<()> {
            self.record("ca_cert", dir);
            self.touch(dir, &[super::CA_CERT, super::CA_KEY]);
            Ok(())
        }

        fn generate_bootstrap_token(&self, dir: &Path) -> Result<()> {
            self.record("bootstrap_token", dir);
            self.touch(dir, &[super::BOOTSTRAP_TOKEN]);
            Ok(())
        }

        fn generate_etcd_cert(&self, dir: &Path, _spec: &ClusterSpec) -> Result<()> {
            self.record("etcd_cert", dir);
            self.touch(dir, &[super::ETCD_CERT, super::ETCD_KEY]);
            Ok(())
        }

        fn generate_apiserver_cert(&self, dir: &Path, _spec: &ClusterSpec) -> Result<()> {
            self.record("apiserver_cert", dir);
            self.touch(dir, &[super::SERVER_CERT, super::SERVER_KEY]);
            Ok(())
        }

        fn generate_admin_kubeconfig(&self, dir: &Path, _spec: &ClusterSpec) -> Result<()> {
            self.record("admin_kubeconfig", dir);
            self.touch(dir, &[super::ADMIN_KUBECONFIG]);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    pub struct MockApi {
        pub labeled: Arc<Mutex<Vec<String>>>,
        pub saved_backup: Arc<Mutex<bool>>,
        pub recovered: Arc<Mutex<bool>>,
    }

    impl ClusterApi for MockApi {
        fn label_control_node(&self, ip: &str) -> Result<()> {
            self.labeled.lock().unwrap().push(ip.to_string());
            Ok(())
        }

        fn save_cert_backup(&self, _auth_dir: &Path) -> Result<()> {
            *self.saved_backup.lock().unwrap() = true;
            Ok(())
        }

        fn recover_cert_backup(&self, auth_dir: &Path) -> Result<()> {
            *self.recovered.lock().unwrap() = true;
            std::fs::create_dir_all(auth_dir)?;
            for f in [super::CA_CERT, super::SERVER_CERT, super::SERVER_KEY] {
                std::fs::write(auth_dir.join(f), b"recovered")?;
            }
            Ok(())
        }
    }
}
