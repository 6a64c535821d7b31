//! Transport to the remote host.
//!
//! Every remote side effect goes through [`Remote`]. Implementations block
//! until the operation finishes and turn a non-zero exit status into
//! [`Error::Remote`]; nothing here retries.

use std::path::Path;
use std::process::Output;

use crate::error::{Error, Result};
use crate::shell::{RemotePath, ShellCommand};

pub mod recording;
pub mod ssh;

pub use recording::{Recorded, RecordingRemote};
pub use ssh::SshRemote;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn stdout(s: impl Into<String>) -> Self {
        Self {
            stdout: s.into(),
            stderr: String::new(),
        }
    }
}

pub trait Remote: Send + Sync {
    /// Human-readable target, e.g. `root@vps.example.com`.
    fn target(&self) -> String;

    fn execute(&self, cmd: &ShellCommand) -> Result<RemoteOutput>;

    fn copy_to_remote(&self, local: &Path, remote: &RemotePath) -> Result<()>;

    fn copy_from_remote(&self, remote: &RemotePath, local: &Path) -> Result<()>;
}

/// Runs a test-style command: exit 0 is `true`, exit 1 is `false`, anything
/// else is an error.
pub fn probe(remote: &dyn Remote, cmd: &ShellCommand) -> Result<bool> {
    match remote.execute(cmd) {
        Ok(_) => Ok(true),
        Err(Error::Remote { code: 1, .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

pub(crate) fn command_summary(out: &Output) -> String {
    let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }
    if !stdout.is_empty() {
        return stdout;
    }
    format!("status {}", out.status)
}

/// Converts a finished process into the shared output/error shape.
pub(crate) fn finish(command: String, out: Output) -> Result<RemoteOutput> {
    if out.status.success() {
        return Ok(RemoteOutput {
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        });
    }
    Err(Error::Remote {
        command,
        code: out.status.code().unwrap_or(-1),
        output: command_summary(&out),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_maps_exit_one_to_false() {
        let remote = RecordingRemote::new();
        remote.fail_on("test -d", 1, "");
        remote.fail_on("docker info", 255, "ssh: connect to host vps port 22: Connection refused");

        assert!(!probe(&remote, &ShellCommand::new("test").lit("-d").arg("x")).unwrap());
        assert!(probe(&remote, &ShellCommand::new("true")).unwrap());

        let err = probe(&remote, &ShellCommand::new("docker").lit("info")).unwrap_err();
        assert_eq!(err.remote_code(), Some(255));
    }
}
