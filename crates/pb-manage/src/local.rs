//! The operator's local container runtime, used by `pull`.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Mutex, mpsc};

use crate::error::{Error, Result};
use crate::log_sanitize::sanitize_log_line;

pub trait LocalStack: Send + Sync {
    /// Fails with [`Error::Precondition`] when the runtime is unreachable.
    fn check_runtime(&self) -> Result<()>;

    fn compose_down(&self, project_dir: &Path, log: &dyn Fn(&str)) -> Result<()>;

    fn compose_up(&self, project_dir: &Path, log: &dyn Fn(&str)) -> Result<()>;
}

/// `docker` / `docker compose` on the local machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct DockerCompose;

impl LocalStack for DockerCompose {
    fn check_runtime(&self) -> Result<()> {
        let status = Command::new("docker")
            .arg("info")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(s) if s.success() => Ok(()),
            _ => Err(Error::Precondition(
                "Docker does not appear to be running. Please start Docker.".into(),
            )),
        }
    }

    fn compose_down(&self, project_dir: &Path, log: &dyn Fn(&str)) -> Result<()> {
        let mut cmd = Command::new("docker");
        cmd.current_dir(project_dir).args(["compose", "down"]);
        run_streaming(cmd, log)
    }

    fn compose_up(&self, project_dir: &Path, log: &dyn Fn(&str)) -> Result<()> {
        let mut cmd = Command::new("docker");
        cmd.current_dir(project_dir)
            .args(["compose", "up", "-d", "--build"]);
        run_streaming(cmd, log)
    }
}

fn read_lines<R: Read>(stream: R, tx: mpsc::Sender<String>) {
    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else { break };
        if tx.send(line).is_err() {
            break;
        }
    }
}

/// Runs a local command, forwarding sanitized stdout/stderr lines to `log`.
pub fn run_streaming(mut cmd: Command, log: &dyn Fn(&str)) -> Result<()> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let shown = format!("{cmd:?}");
    tracing::debug!(command = %shown, "local");

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| Error::Spawn { program, source })?;

    let (tx, rx) = mpsc::channel::<String>();
    if let Some(out) = child.stdout.take() {
        let tx = tx.clone();
        std::thread::spawn(move || read_lines(out, tx));
    }
    if let Some(err) = child.stderr.take() {
        let tx = tx.clone();
        std::thread::spawn(move || read_lines(err, tx));
    }
    drop(tx);

    for line in rx {
        let line = sanitize_log_line(&line);
        if !line.is_empty() {
            log(&line);
        }
    }

    let status = child.wait()?;
    if !status.success() {
        return Err(Error::msg(format!("{shown} failed: {status}")));
    }
    Ok(())
}

/// [`LocalStack`] stand-in that records calls instead of touching docker.
#[derive(Debug, Default)]
pub struct RecordingStack {
    runtime_down: bool,
    fail_down: bool,
    calls: Mutex<Vec<String>>,
}

impl RecordingStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runtime_down() -> Self {
        Self {
            runtime_down: true,
            ..Self::default()
        }
    }

    pub fn failing_down() -> Self {
        Self {
            fail_down: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut c) = self.calls.lock() {
            c.push(call);
        }
    }
}

impl LocalStack for RecordingStack {
    fn check_runtime(&self) -> Result<()> {
        self.record("docker info".into());
        if self.runtime_down {
            return Err(Error::Precondition(
                "Docker does not appear to be running. Please start Docker.".into(),
            ));
        }
        Ok(())
    }

    fn compose_down(&self, project_dir: &Path, _log: &dyn Fn(&str)) -> Result<()> {
        self.record(format!("compose down ({})", project_dir.display()));
        if self.fail_down {
            return Err(Error::msg("no compose project"));
        }
        Ok(())
    }

    fn compose_up(&self, project_dir: &Path, _log: &dyn Fn(&str)) -> Result<()> {
        self.record(format!("compose up ({})", project_dir.display()));
        Ok(())
    }
}
