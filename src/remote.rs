//! Remote command channel — one authenticated session per host.
//!
//! The orchestrator only ever talks to nodes through the `CommandChannel`
//! trait; the production implementation shells out to `ssh`/`scp` (with
//! `sshpass` when a password is configured). Channels are lifecycle-scoped
//! to a single node's handling and never shared across concurrent tasks.

use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};

use crate::config::NodeSpec;

/// A command-execution session bound to one host.
///
/// `execute` returns the captured output lines: stderr lines when the remote
/// command produced any, stdout lines otherwise. The remote exit status is
/// deliberately not surfaced; callers inspect the output text, and per-unit
/// health is probed explicitly via `systemctl is-active`.
pub trait CommandChannel: std::fmt::Debug {
    fn connect(&mut self) -> Result<()>;

    fn execute(&mut self, cmd: &str) -> Result<Vec<String>>;

    fn copy(&mut self, local: &Path, remote: &str, recursive: bool) -> Result<()>;

    fn close(&mut self);

    /// Ensure a remote directory exists; with `clear`, empty it instead when
    /// it already exists.
    fn prep_dir(&mut self, dir: &str, clear: bool) -> Result<()> {
        let listing = self.execute(&format!("ls -l {dir}"))?;
        let missing = listing
            .first()
            .map(|l| l.contains("No such file"))
            .unwrap_or(true);
        if missing {
            self.execute(&format!("mkdir -p {dir}"))?;
        } else if clear {
            self.execute(&format!("rm -rf {dir}/*"))?;
        }
        Ok(())
    }
}

/// Opens a connected channel to a node. The one seam the whole orchestrator
/// shares; tests substitute a scripted implementation.
pub trait ChannelFactory: Send + Sync {
    fn open(&self, node: &NodeSpec) -> Result<Box<dyn CommandChannel + Send>>;
}

const CONNECT_TIMEOUT_SECS: u32 = 10;

/// Production channel: one `ssh`/`scp` process per operation.
///
/// There is no persistent connection to tear down; `close` only marks the
/// session released. Password authentication goes through `sshpass`, which
/// must be installed on the deploy host.
#[derive(Debug)]
pub struct SshChannel {
    host: String,
    user: String,
    password: String,
    connected: bool,
}

impl SshChannel {
    pub fn new(host: &str, user: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            user: user.to_string(),
            password: password.to_string(),
            connected: false,
        }
    }

    fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn common_options(&self) -> Vec<String> {
        let mut opts = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}"),
        ];
        if self.password.is_empty() {
            opts.push("-o".to_string());
            opts.push("BatchMode=yes".to_string());
        }
        opts
    }

    /// Full argv for an ssh invocation, `sshpass` prefix included.
    fn ssh_invocation(&self, cmd: &str) -> Vec<String> {
        let mut argv = Vec::new();
        if !self.password.is_empty() {
            argv.push("sshpass".to_string());
            argv.push("-p".to_string());
            argv.push(self.password.clone());
        }
        argv.push("ssh".to_string());
        argv.extend(self.common_options());
        argv.push(self.target());
        argv.push(cmd.to_string());
        argv
    }

    fn scp_invocation(&self, local: &Path, remote: &str, recursive: bool) -> Vec<String> {
        let mut argv = Vec::new();
        if !self.password.is_empty() {
            argv.push("sshpass".to_string());
            argv.push("-p".to_string());
            argv.push(self.password.clone());
        }
        argv.push("scp".to_string());
        argv.extend(self.common_options());
        if recursive {
            argv.push("-r".to_string());
        }
        argv.push(local.display().to_string());
        argv.push(format!("{}:{}", self.target(), remote));
        argv
    }

    fn run(&self, argv: &[String]) -> Result<std::process::Output> {
        Command::new(&argv[0])
            .args(&argv[1..])
            .output()
            .with_context(|| format!("failed to run {} for {}", argv[0], self.host))
    }
}

fn to_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(|l| l.to_string())
        .collect()
}

impl CommandChannel for SshChannel {
    fn connect(&mut self) -> Result<()> {
        let argv = self.ssh_invocation("true");
        let output = self.run(&argv)?;
        if !output.status.success() {
            bail!(
                "cannot establish SSH session to {}: {}",
                self.target(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        self.connected = true;
        Ok(())
    }

    fn execute(&mut self, cmd: &str) -> Result<Vec<String>> {
        let argv = self.ssh_invocation(cmd);
        let output = self.run(&argv)?;
        let err_lines = to_lines(&output.stderr);
        if !err_lines.is_empty() {
            return Ok(err_lines);
        }
        Ok(to_lines(&output.stdout))
    }

    fn copy(&mut self, local: &Path, remote: &str, recursive: bool) -> Result<()> {
        let argv = self.scp_invocation(local, remote, recursive);
        let output = self.run(&argv)?;
        if !output.status.success() {
            bail!(
                "scp {} -> {}:{} failed: {}",
                local.display(),
                self.host,
                remote,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.connected {
            tracing::debug!(host = %self.host, "session released");
            self.connected = false;
        }
    }
}

/// Factory producing `SshChannel`s from node credentials.
pub struct SshChannelFactory;

impl ChannelFactory for SshChannelFactory {
    fn open(&self, node: &NodeSpec) -> Result<Box<dyn CommandChannel + Send>> {
        let mut channel = SshChannel::new(&node.external_ip, &node.ssh_user, &node.ssh_password);
        channel.connect()?;
        Ok(Box::new(channel))
    }
}
