use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::remote::{Remote, RemoteOutput};
use crate::shell::{RemotePath, ShellCommand};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Exec(String),
    Upload { local: PathBuf, remote: String },
    Download { remote: String, local: PathBuf },
}

#[derive(Debug, Clone)]
enum Reply {
    Ok(String),
    Fail { code: i32, output: String },
}

/// In-memory [`Remote`] that records every call and replays scripted replies.
///
/// Replies are matched by substring against the rendered command; the first
/// registered match wins. Unmatched commands succeed with empty output.
/// Uploaded files are kept in memory and served back on download.
#[derive(Debug, Default)]
pub struct RecordingRemote {
    calls: Mutex<Vec<Recorded>>,
    replies: Mutex<Vec<(String, Reply)>>,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl RecordingRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply_on(&self, needle: &str, stdout: &str) {
        if let Ok(mut r) = self.replies.lock() {
            r.push((needle.to_string(), Reply::Ok(stdout.to_string())));
        }
    }

    pub fn fail_on(&self, needle: &str, code: i32, output: &str) {
        if let Ok(mut r) = self.replies.lock() {
            r.push((
                needle.to_string(),
                Reply::Fail {
                    code,
                    output: output.to_string(),
                },
            ));
        }
    }

    /// Seeds a remote file served by `copy_from_remote`.
    pub fn put_file(&self, remote: &RemotePath, bytes: impl Into<Vec<u8>>) {
        if let Ok(mut f) = self.files.lock() {
            f.insert(remote.to_string(), bytes.into());
        }
    }

    pub fn file(&self, remote: &RemotePath) -> Option<Vec<u8>> {
        self.files
            .lock()
            .ok()
            .and_then(|f| f.get(&remote.to_string()).cloned())
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Rendered commands only, in order.
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Recorded::Exec(cmd) => Some(cmd),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Recorded) {
        if let Ok(mut c) = self.calls.lock() {
            c.push(call);
        }
    }
}

impl Remote for RecordingRemote {
    fn target(&self) -> String {
        "recording".into()
    }

    fn execute(&self, cmd: &ShellCommand) -> Result<RemoteOutput> {
        let rendered = cmd.render();
        self.record(Recorded::Exec(rendered.clone()));

        let reply = self.replies.lock().ok().and_then(|r| {
            r.iter()
                .find(|(needle, _)| rendered.contains(needle.as_str()))
                .map(|(_, reply)| reply.clone())
        });
        match reply {
            None => Ok(RemoteOutput::default()),
            Some(Reply::Ok(stdout)) => Ok(RemoteOutput::stdout(stdout)),
            Some(Reply::Fail { code, output }) => Err(Error::Remote {
                command: rendered,
                code,
                output,
            }),
        }
    }

    fn copy_to_remote(&self, local: &Path, remote: &RemotePath) -> Result<()> {
        self.record(Recorded::Upload {
            local: local.to_path_buf(),
            remote: remote.to_string(),
        });
        let bytes = fs::read(local).map_err(|e| Error::path(local, e))?;
        self.put_file(remote, bytes);
        Ok(())
    }

    fn copy_from_remote(&self, remote: &RemotePath, local: &Path) -> Result<()> {
        self.record(Recorded::Download {
            remote: remote.to_string(),
            local: local.to_path_buf(),
        });
        let Some(bytes) = self.file(remote) else {
            return Err(Error::Remote {
                command: format!("scp {remote}"),
                code: 1,
                output: format!("scp: {remote}: No such file or directory"),
            });
        };
        fs::write(local, bytes).map_err(|e| Error::path(local, e))
    }
}
