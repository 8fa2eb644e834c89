//! Environment validator — per-node readiness checks plus the cluster-wide
//! clock-skew check.
//!
//! Node checks run sequentially, one session per node, and append to the
//! node's detail string rather than short-circuiting, so a node with several
//! problems reports all of them at once. The clock-skew check is the one
//! concurrent part: one probe task per node, each with its own session and
//! its own timeout, joined before comparing against a locally obtained
//! reference time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::report::Verdict;
use crate::config::{ClusterSpec, NodeSpec, Role};
use crate::error::DeployError;
use crate::remote::{ChannelFactory, CommandChannel};
use crate::services::ETCD_CONTAINER;

const ESSENTIAL_BINS: [&str; 4] = ["systemctl", "docker", "sysctl", "jq"];
const RECOMMENDED_BINS: [&str; 2] = ["nslookup", "conntrack"];
const LEFTOVER_DIRS: [&str; 3] = ["/var/lib/kubelet/", "/etc/kubernetes/", "/var/lib/etcd/"];

pub const MAX_CLOCK_SKEW_SECS: i64 = 60;
const CLOCK_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const DATE_CMD: &str = "date +'%Y-%m-%d %H:%M:%S'";
const DATE_FMT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct NodeCheckResult {
    pub node: String,
    pub ip: String,
    pub passed: bool,
    pub details: String,
}

impl NodeCheckResult {
    fn fail(&mut self, detail: impl AsRef<str>) {
        self.passed = false;
        self.details.push_str(detail.as_ref());
    }

    fn note(&mut self, detail: impl AsRef<str>) {
        self.details.push_str(detail.as_ref());
    }
}

#[derive(Debug, Clone)]
pub struct ClockSkewCheck {
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct PrecheckSummary {
    pub nodes: Vec<NodeCheckResult>,
    pub clock_skew: ClockSkewCheck,
    pub verdict: Verdict,
}

pub struct EnvironmentValidator<'a> {
    spec: &'a ClusterSpec,
    channels: Arc<dyn ChannelFactory>,
}

impl<'a> EnvironmentValidator<'a> {
    pub fn new(spec: &'a ClusterSpec, channels: Arc<dyn ChannelFactory>) -> Self {
        Self { spec, channels }
    }

    /// Run the full precheck. `check_leftover` decides whether residue from
    /// an earlier deployment is a hard failure (fresh deploy) or merely
    /// informational (re-adding hosts into a live cluster).
    pub fn run(&self, check_leftover: bool) -> Result<PrecheckSummary, DeployError> {
        let mut nodes = Vec::with_capacity(self.spec.nodes.len());
        for node in &self.spec.nodes {
            let result = self.check_node(node, check_leftover);
            info!(
                node = %result.node,
                passed = result.passed,
                details = %result.details,
                "node environment check"
            );
            nodes.push(result);
        }

        let clock_skew = self.check_clock_skew()?;

        // Every node is scanned exhaustively above, but the summary message
        // names only the first failing node; later failures are visible in
        // the per-node list alone.
        let mut message = String::new();
        if let Some(failed) = nodes.iter().find(|r| !r.passed) {
            message = format!(
                "Environment check on node '{}' failed. Details: {}",
                failed.node, failed.details
            );
        }
        if !clock_skew.ok {
            message.push_str(&clock_skew.detail);
        }

        if !message.is_empty() {
            return Err(DeployError::precheck(message));
        }

        Ok(PrecheckSummary {
            nodes,
            clock_skew,
            verdict: Verdict::Success,
        })
    }

    fn check_node(&self, node: &NodeSpec, check_leftover: bool) -> NodeCheckResult {
        let mut result = NodeCheckResult {
            node: node.hostname.clone(),
            ip: node.external_ip.clone(),
            passed: true,
            details: String::new(),
        };

        let mut channel = match self.channels.open(node) {
            Ok(c) => c,
            Err(e) => {
                warn!(node = %node.hostname, ip = %node.external_ip, error = %e, "node unreachable");
                result.fail(format!("Node is not reachable over SSH: {e}; "));
                return result;
            }
        };

        if let Err(e) = self.check_tooling(channel.as_mut(), &mut result) {
            result.fail(format!("check 'tooling' errored: {e}; "));
        }
        if let Err(e) = self.check_runtime_version(channel.as_mut(), &mut result) {
            result.fail(format!("check 'runtime-version' errored: {e}; "));
        }
        if let Err(e) = self.check_leftover_dirs(channel.as_mut(), &mut result, check_leftover) {
            result.fail(format!("check 'leftover-state' errored: {e}; "));
        }
        if let Err(e) = self.check_storage_residue(node, channel.as_mut(), &mut result) {
            result.fail(format!("check 'storage-residue' errored: {e}; "));
        }
        if let Err(e) = self.check_ip_forwarding(channel.as_mut(), &mut result) {
            result.fail(format!("check 'ip-forwarding' errored: {e}; "));
        }
        if let Err(e) = self.check_mac_state(channel.as_mut(), &mut result) {
            result.fail(format!("check 'mac-state' errored: {e}; "));
        }

        channel.close();
        result
    }

    fn check_tooling(
        &self,
        channel: &mut (dyn CommandChannel + Send),
        result: &mut NodeCheckResult,
    ) -> Result<()> {
        for bin in ESSENTIAL_BINS {
            if !module_present(channel, bin)? {
                result.fail(format!("required component '{bin}' is not found; "));
            }
        }
        for bin in RECOMMENDED_BINS {
            if !module_present(channel, bin)? {
                warn!(component = bin, "recommended component is not found");
                result.note(format!("recommended component '{bin}' is not found; "));
            }
        }
        Ok(())
    }

    fn check_runtime_version(
        &self,
        channel: &mut (dyn CommandChannel + Send),
        result: &mut NodeCheckResult,
    ) -> Result<()> {
        let out = channel.execute("docker version --format {{.Server.Version}}")?;
        let first = out.first().map(String::as_str).unwrap_or("").trim();
        if first.is_empty() || first.contains("Cannot connect") {
            result.fail("container runtime daemon is not running; ");
            return Ok(());
        }
        let allowed = &self.spec.runtime.allowed_versions;
        if !allowed.iter().any(|p| first.starts_with(p.as_str())) {
            result.fail(format!(
                "incompatible container runtime version '{first}' (allowed: {}); ",
                allowed.join(", ")
            ));
        }
        Ok(())
    }

    fn check_leftover_dirs(
        &self,
        channel: &mut (dyn CommandChannel + Send),
        result: &mut NodeCheckResult,
        check_leftover: bool,
    ) -> Result<()> {
        let mut found = Vec::new();
        for dir in LEFTOVER_DIRS {
            let out = channel.execute(&format!("ls -l {dir}"))?;
            if dir_is_nonempty(&out) {
                found.push(dir);
            }
        }
        if !found.is_empty() {
            let detail = format!("found non-empty directories: {}; ", found.join(", "));
            if check_leftover {
                result.fail(detail);
            } else {
                warn!(dirs = %found.join(", "), "leftover state present, proceeding anyway");
                result.note(detail);
            }
        }
        Ok(())
    }

    fn check_storage_residue(
        &self,
        node: &NodeSpec,
        channel: &mut (dyn CommandChannel + Send),
        result: &mut NodeCheckResult,
    ) -> Result<()> {
        if !node.has_role(Role::Storage) {
            return Ok(());
        }
        let out = channel.execute(&format!(
            "docker ps -a --format {{{{.Names}}}} --filter name={ETCD_CONTAINER}"
        ))?;
        if out.iter().any(|l| l.contains(ETCD_CONTAINER)) {
            result.fail("existing storage-service container found; ");
        }
        Ok(())
    }

    fn check_ip_forwarding(
        &self,
        channel: &mut (dyn CommandChannel + Send),
        result: &mut NodeCheckResult,
    ) -> Result<()> {
        let out = channel.execute("sysctl -n net.ipv4.conf.all.forwarding")?;
        if out.first().map(|l| l.trim() != "1").unwrap_or(true) {
            result.fail("IPv4 forwarding is disabled; ");
        }
        Ok(())
    }

    fn check_mac_state(
        &self,
        channel: &mut (dyn CommandChannel + Send),
        result: &mut NodeCheckResult,
    ) -> Result<()> {
        let out = channel.execute("getenforce")?;
        if out.iter().any(|l| l.contains("Enforcing")) {
            result.fail("SELinux is enforcing; ");
        }
        Ok(())
    }

    /// Probe every node's wall clock concurrently and compare against a
    /// reference obtained locally. A probe that times out or errors counts
    /// as a failed check rather than stalling or crashing the precheck.
    fn check_clock_skew(&self) -> Result<ClockSkewCheck, DeployError> {
        let rt = tokio::runtime::Runtime::new()
            .context("failed to build runtime for clock-skew check")?;

        let probes = rt.block_on(async {
            let mut set = JoinSet::new();
            for node in self.spec.nodes.clone() {
                let factory = Arc::clone(&self.channels);
                set.spawn(async move {
                    let host = node.hostname.clone();
                    let probed = tokio::time::timeout(
                        CLOCK_PROBE_TIMEOUT,
                        tokio::task::spawn_blocking(move || probe_node_time(factory.as_ref(), &node)),
                    )
                    .await;
                    let outcome = match probed {
                        Err(_) => Err("clock probe timed out".to_string()),
                        Ok(Err(join_err)) => Err(format!("clock probe aborted: {join_err}")),
                        Ok(Ok(Err(e))) => Err(format!("{e:#}")),
                        Ok(Ok(Ok(time))) => Ok(time),
                    };
                    (host, outcome)
                });
            }

            let mut probes = Vec::new();
            while let Some(joined) = set.join_next().await {
                if let Ok(probe) = joined {
                    probes.push(probe);
                }
            }
            probes
        });

        let reference = chrono::Local::now().naive_local();
        let mut max_skew = 0i64;
        let mut failures = Vec::new();
        for (host, outcome) in probes {
            match outcome {
                Ok(time) => max_skew = max_skew.max((time - reference).num_seconds().abs()),
                Err(e) => failures.push(format!("{host}: {e}")),
            }
        }

        if !failures.is_empty() {
            return Ok(ClockSkewCheck {
                ok: false,
                detail: format!("Clock check failed on: {}. ", failures.join("; ")),
            });
        }
        if max_skew > MAX_CLOCK_SKEW_SECS {
            return Ok(ClockSkewCheck {
                ok: false,
                detail: format!(
                    "Clock skew between nodes exceeds {MAX_CLOCK_SKEW_SECS}s \
                     (max skew {max_skew}s); check the NTP configuration. "
                ),
            });
        }
        info!(max_skew_secs = max_skew, "clock skew within bounds");
        Ok(ClockSkewCheck {
            ok: true,
            detail: String::new(),
        })
    }
}

fn module_present(channel: &mut (dyn CommandChannel + Send), bin: &str) -> Result<bool> {
    let out = channel.execute(&format!("command -v {bin}"))?;
    Ok(out
        .first()
        .map(|l| !l.trim().is_empty() && !l.contains("not found"))
        .unwrap_or(false))
}

fn dir_is_nonempty(lines: &[String]) -> bool {
    let Some(first) = lines.first() else {
        return false;
    };
    if first.contains("No such file") {
        return false;
    }
    !(lines.len() == 1 && first.trim() == "total 0")
}

fn probe_node_time(factory: &dyn ChannelFactory, node: &NodeSpec) -> Result<NaiveDateTime> {
    let mut channel = factory.open(node)?;
    let out = channel.execute(DATE_CMD)?;
    channel.close();
    let line = out.first().context("empty response to clock probe")?;
    NaiveDateTime::parse_from_str(line.trim(), DATE_FMT)
        .with_context(|| format!("unparseable node time '{}'", line.trim()))
}
