use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::{Config, SshOptions};
use crate::error::{Error, Result};
use crate::remote::{Remote, RemoteOutput, finish};
use crate::shell::{RemotePath, ShellCommand};

/// Runs commands through the system `ssh`/`scp` binaries.
#[derive(Debug, Clone)]
pub struct SshRemote {
    target: String,
    opts: SshOptions,
}

impl SshRemote {
    pub fn new(config: &Config) -> Self {
        Self {
            target: config.target(),
            opts: config.ssh.clone(),
        }
    }

    fn configure(&self, cmd: &mut Command, scp_style: bool) {
        configure_ssh_cmd(cmd, &self.opts, scp_style);
        cmd.arg("-o").arg("BatchMode=yes");
        cmd.stdin(Stdio::null());
    }

    fn scp(&self, from: String, to: String, shown: String) -> Result<()> {
        let mut cmd = Command::new("scp");
        self.configure(&mut cmd, true);
        cmd.arg("-q").arg("--").arg(from).arg(to);
        tracing::debug!(host = %self.target, "scp {shown}");
        let out = cmd.output().map_err(|source| Error::Spawn {
            program: "scp".into(),
            source,
        })?;
        finish(format!("scp {shown}"), out).map(|_| ())
    }
}

fn configure_ssh_cmd(cmd: &mut Command, ssh: &SshOptions, scp_style: bool) {
    if let Some(port) = ssh.port {
        cmd.arg(if scp_style { "-P" } else { "-p" })
            .arg(port.to_string());
    }
    if let Some(id) = &ssh.identity_file {
        cmd.arg("-i").arg(id);
    }
    if let Some(kh) = &ssh.known_hosts_file {
        cmd.arg("-o")
            .arg(format!("UserKnownHostsFile={}", kh.display()));
    }
    if matches!(ssh.strict_host_key_checking, Some(false)) {
        cmd.arg("-o").arg("StrictHostKeyChecking=no");
        if ssh.known_hosts_file.is_none() {
            cmd.arg("-o").arg("UserKnownHostsFile=/dev/null");
        }
    }
}

impl Remote for SshRemote {
    fn target(&self) -> String {
        self.target.clone()
    }

    fn execute(&self, cmd: &ShellCommand) -> Result<RemoteOutput> {
        let rendered = cmd.render();
        tracing::debug!(host = %self.target, command = %rendered, "ssh");

        let mut ssh = Command::new("ssh");
        self.configure(&mut ssh, false);
        ssh.arg("--").arg(&self.target).arg(&rendered);
        let out = ssh.output().map_err(|source| Error::Spawn {
            program: "ssh".into(),
            source,
        })?;
        finish(rendered, out)
    }

    fn copy_to_remote(&self, local: &Path, remote: &RemotePath) -> Result<()> {
        let to = format!("{}:{}", self.target, remote.scp_spec());
        let shown = format!("{} -> {to}", local.display());
        self.scp(local.display().to_string(), to, shown)
    }

    fn copy_from_remote(&self, remote: &RemotePath, local: &Path) -> Result<()> {
        let from = format!("{}:{}", self.target, remote.scp_spec());
        let shown = format!("{from} -> {}", local.display());
        self.scp(from, local.display().to_string(), shown)
    }
}
