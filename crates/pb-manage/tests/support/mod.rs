#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, mpsc};

use pb_manage::Result;
use pb_manage::config::{Config, ConfigDoc, Overrides};
use pb_manage::error::Error;
use pb_manage::executor::{ChannelSink, ExecCtx, ExecEvent};
use pb_manage::local::{LocalStack, RecordingStack};
use pb_manage::remote::{Remote, RemoteOutput};
use pb_manage::shell::{RemotePath, ShellCommand};
use pb_manage::{Invocation, Operation, Request};
use serde_json::{Value, json};
use tempfile::TempDir;

const FAKE_DOCKER: &str = r#"#!/bin/sh
state="$FAKE_STATE"
echo "docker $*" >> "$state/calls.log"
cmd="$1"
shift
case "$cmd" in
  network)
    sub="$1"; net="$2"
    case "$sub" in
      inspect)
        [ -f "$state/net-$net" ] && exit 0
        echo "Error response from daemon: network $net not found" >&2; exit 1;;
      create)
        touch "$state/net-$net"; echo "net-$net"; exit 0;;
    esac
    exit 2;;
  rm)
    [ "$1" = "-f" ] && shift
    name="$1"
    if [ -f "$state/ctr-$name" ]; then
      rm -f "$state/ctr-$name" "$state/vol-$name"; echo "$name"; exit 0
    fi
    echo "Error response from daemon: No such container: $name" >&2; exit 1;;
  run)
    name=""; net=""; vol=""; image=""
    while [ $# -gt 0 ]; do
      case "$1" in
        -d) shift;;
        --name) name="$2"; shift 2;;
        --network) net="$2"; shift 2;;
        -v) vol="$2"; shift 2;;
        *) image="$1"; shift;;
      esac
    done
    if [ ! -f "$state/net-$net" ]; then
      echo "docker: Error response from daemon: network $net not found." >&2; exit 125
    fi
    if [ -f "$state/ctr-$name" ]; then
      echo "docker: Error response from daemon: Conflict. The container name \"/$name\" is already in use." >&2; exit 125
    fi
    src="${vol%%:*}"
    if [ ! -d "$src" ]; then
      echo "docker: bind source path does not exist: $src" >&2; exit 125
    fi
    echo running > "$state/ctr-$name"
    echo "$src" > "$state/vol-$name"
    echo "cid-$name";;
  exec)
    name="$1"; shift
    if [ "$(cat "$state/ctr-$name" 2>/dev/null)" != running ]; then
      echo "Error response from daemon: container $name is not running" >&2; exit 1
    fi
    echo "$*" >> "$state/exec-$name.log";;
  stop)
    name="$1"
    if [ ! -f "$state/ctr-$name" ]; then
      echo "Error response from daemon: No such container: $name" >&2; exit 1
    fi
    echo exited > "$state/ctr-$name"; echo "$name";;
  start)
    name="$1"
    if [ ! -f "$state/ctr-$name" ]; then
      echo "Error response from daemon: No such container: $name" >&2; exit 1
    fi
    echo running > "$state/ctr-$name"; echo "$name";;
  container)
    shift
    fmt=""
    if [ "$1" = "-f" ]; then fmt="$2"; shift 2; fi
    name="$1"
    if [ ! -f "$state/ctr-$name" ]; then
      echo "Error: No such object: $name" >&2; exit 1
    fi
    if [ -n "$fmt" ]; then
      if [ "$(cat "$state/ctr-$name")" = running ]; then echo true; else echo false; fi
    else
      echo "[{\"Name\": \"/$name\"}]"
    fi;;
  *)
    echo "fake docker: unsupported command $cmd" >&2; exit 2;;
esac
"#;

const FAKE_NGINX: &str = r#"#!/bin/sh
echo "nginx $*" >> "$FAKE_STATE/calls.log"
if [ "$1" = "-s" ] && [ "$2" = "reload" ]; then exit 0; fi
exit 2
"#;

/// A throwaway "remote host": commands run locally under `sh -c` with HOME
/// pointing into a temp dir and fake `docker`/`nginx` first on PATH.
pub struct Sandbox {
    _root: TempDir,
    pub root: PathBuf,
    pub home: PathBuf,
    pub state: PathBuf,
    pub bin: PathBuf,
    pub project: PathBuf,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let sb = Self {
            home: root.join("home"),
            state: root.join("state"),
            bin: root.join("bin"),
            project: root.join("project"),
            root,
            _root: dir,
        };
        for d in [&sb.home, &sb.state, &sb.bin, &sb.project] {
            fs::create_dir_all(d).unwrap();
        }
        fs::create_dir_all(sb.root.join("nginx")).unwrap();
        fs::create_dir_all(sb.root.join("tmp")).unwrap();
        write_script(&sb.bin.join("docker"), FAKE_DOCKER);
        write_script(&sb.bin.join("nginx"), FAKE_NGINX);
        sb
    }

    pub fn config(&self) -> Config {
        config_from(json!({
            "vpsHost": "sandbox.local",
            "sshUser": "deploy",
            "domain": "example.com",
            "layout": {
                "proxyConfDir": self.root.join("nginx").display().to_string(),
                "tmpDir": self.root.join("tmp").display().to_string(),
            }
        }))
    }

    pub fn invocation(&self, request: Request) -> Invocation {
        Invocation::build(request, self.config(), &self.project).unwrap()
    }

    pub fn remote(&self) -> Arc<SandboxRemote> {
        Arc::new(SandboxRemote {
            home: self.home.clone(),
            state: self.state.clone(),
            bin: self.bin.clone(),
        })
    }

    pub fn run(&self, request: Request) -> Result<ExecCtx> {
        self.run_with(request, Arc::new(RecordingStack::new()))
    }

    pub fn run_with(&self, request: Request, local: Arc<dyn LocalStack>) -> Result<ExecCtx> {
        let inv = self.invocation(request);
        let (mut ctx, _rx) = ctx(self.remote(), local);
        pb_manage::modules::run(&inv, &mut ctx)?;
        Ok(ctx)
    }

    pub fn data_dir(&self, env: &str) -> PathBuf {
        self.home.join("pb_data").join(env)
    }

    pub fn base_template(&self) -> PathBuf {
        self.home.join("pb_base/pb_data")
    }

    pub fn rule_path(&self, env: &str) -> PathBuf {
        self.root.join("nginx").join(format!("pb-{env}.conf"))
    }

    pub fn remote_tmp(&self, file: &str) -> PathBuf {
        self.root.join("tmp").join(file)
    }

    pub fn container_state(&self, env: &str) -> Option<String> {
        fs::read_to_string(self.state.join(format!("ctr-pb-{env}")))
            .ok()
            .map(|s| s.trim().to_string())
    }

    pub fn set_container_state(&self, env: &str, state: Option<&str>) {
        let p = self.state.join(format!("ctr-pb-{env}"));
        match state {
            Some(s) => fs::write(p, format!("{s}\n")).unwrap(),
            None => {
                let _ = fs::remove_file(p);
            }
        }
    }

    pub fn network_exists(&self, net: &str) -> bool {
        self.state.join(format!("net-{net}")).exists()
    }

    /// Lines the fake binaries logged, e.g. `docker exec pb-x pocketbase migrate up`.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.state.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(ToOwned::to_owned)
            .collect()
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

pub struct SandboxRemote {
    home: PathBuf,
    state: PathBuf,
    bin: PathBuf,
}

impl Remote for SandboxRemote {
    fn target(&self) -> String {
        "deploy@sandbox.local".into()
    }

    fn execute(&self, cmd: &ShellCommand) -> Result<RemoteOutput> {
        let rendered = cmd.render();
        let path = format!(
            "{}:{}",
            self.bin.display(),
            std::env::var("PATH").unwrap_or_default()
        );
        let out = Command::new("sh")
            .arg("-c")
            .arg(&rendered)
            .current_dir(&self.home)
            .env("HOME", &self.home)
            .env("PATH", path)
            .env("FAKE_STATE", &self.state)
            .output()
            .map_err(|source| Error::Spawn {
                program: "sh".into(),
                source,
            })?;
        if out.status.success() {
            return Ok(RemoteOutput {
                stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            });
        }
        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        Err(Error::Remote {
            command: rendered,
            code: out.status.code().unwrap_or(-1),
            output: stderr,
        })
    }

    fn copy_to_remote(&self, local: &Path, remote: &RemotePath) -> Result<()> {
        let dst = remote.resolve(&self.home);
        fs::copy(local, &dst).map_err(|e| Error::path(&dst, e))?;
        Ok(())
    }

    fn copy_from_remote(&self, remote: &RemotePath, local: &Path) -> Result<()> {
        let src = remote.resolve(&self.home);
        fs::copy(&src, local).map_err(|e| Error::path(&src, e))?;
        Ok(())
    }
}

pub fn config_from(value: Value) -> Config {
    Config::from_doc(
        ConfigDoc {
            path: PathBuf::from("<test>"),
            value,
        },
        &Overrides::default(),
    )
    .unwrap()
}

pub fn example_config() -> Config {
    config_from(json!({
        "vpsHost": "vps.example.com",
        "sshUser": "root",
        "domain": "example.com"
    }))
}

pub fn request(op: Operation, env: &str) -> Request {
    Request::new(op, Some(env.to_string()))
}

pub fn ctx(
    remote: Arc<dyn Remote>,
    local: Arc<dyn LocalStack>,
) -> (ExecCtx, mpsc::Receiver<ExecEvent>) {
    let (tx, rx) = mpsc::channel();
    let ctx = ExecCtx::new(false, Arc::new(ChannelSink::new(tx)), remote, local);
    (ctx, rx)
}

/// Relative path -> bytes for every file under `dir`.
pub fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(dir).unwrap().to_path_buf();
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

pub fn write_tree(dir: &Path, files: &[(&str, &[u8])]) {
    for (rel, bytes) in files {
        let p = dir.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, bytes).unwrap();
    }
}
