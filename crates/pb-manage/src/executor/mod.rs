use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, mpsc};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::invocation::Invocation;
use crate::local::LocalStack;
use crate::log_sanitize::{sanitize_log_line, sanitize_output};
use crate::planner::Plan;
use crate::remote::{self, Remote, RemoteOutput};
use crate::shell::ShellCommand;

pub type TaskExecFn = fn(&Invocation, &mut ExecCtx) -> Result<()>;

pub const REMOTE_ARCHIVE: &str = "remote_archive";
pub const LOCAL_ARCHIVE: &str = "local_archive";
pub const SHA256: &str = "sha256";

/// Named outputs produced by a run, printed by the CLI on success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    outputs: BTreeMap<&'static str, String>,
}

impl RunReport {
    pub fn set(&mut self, key: &'static str, value: impl Into<String>) {
        self.outputs.insert(key, value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.outputs.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.outputs.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.outputs.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    TaskStarted {
        id: String,
    },
    TaskLog {
        id: String,
        line: String,
    },
    TaskFinished {
        id: String,
        ok: bool,
        error: Option<String>,
        elapsed_ms: u128,
    },
    ExecutorDone {
        ok: bool,
        error: Option<String>,
    },
}

pub trait ExecSink: Send + Sync {
    fn emit(&self, ev: ExecEvent);
}

#[derive(Default)]
pub struct StdoutSink {
    state: Mutex<StdoutSinkState>,
}

#[derive(Default)]
struct StdoutSinkState {
    started_at: Option<Instant>,
    tasks_ok: usize,
    tasks_failed: usize,
    failed_task: Option<String>,
}

fn format_elapsed(ms: u128) -> String {
    let secs = ms / 1000;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

impl ExecSink for StdoutSink {
    fn emit(&self, ev: ExecEvent) {
        match ev {
            ExecEvent::TaskStarted { id } => {
                if let Ok(mut s) = self.state.lock() {
                    s.started_at.get_or_insert_with(Instant::now);
                }
                println!("RUN: {id}");
            }
            ExecEvent::TaskLog { id, line } => println!("[{id}] {line}"),
            ExecEvent::TaskFinished {
                id,
                ok,
                error,
                elapsed_ms,
            } => {
                if let Ok(mut s) = self.state.lock() {
                    if ok {
                        s.tasks_ok += 1;
                    } else {
                        s.tasks_failed += 1;
                        s.failed_task = Some(id.clone());
                    }
                }
                if ok {
                    println!("DONE: {id} ({elapsed_ms}ms)");
                } else {
                    println!("FAIL: {id} ({elapsed_ms}ms) {}", error.unwrap_or_default());
                }
            }
            ExecEvent::ExecutorDone { ok, error } => {
                let Ok(mut s) = self.state.lock() else {
                    return;
                };
                let wall = s
                    .started_at
                    .map(|t| t.elapsed().as_millis())
                    .unwrap_or_default();
                println!("SUMMARY:");
                println!("  status: {}", if ok { "ok" } else { "failed" });
                println!("  steps: ok={} failed={}", s.tasks_ok, s.tasks_failed);
                println!("  elapsed: {}", format_elapsed(wall));
                if let Some(step) = &s.failed_task {
                    println!("  failed_step: {step}");
                }
                if let Some(e) = error {
                    println!("  error: {e}");
                }
                *s = StdoutSinkState::default();
            }
        }
    }
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ExecEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ExecEvent>) -> Self {
        Self { tx }
    }
}

impl ExecSink for ChannelSink {
    fn emit(&self, ev: ExecEvent) {
        let _ = self.tx.send(ev);
    }
}

pub struct ExecCtx {
    pub dry_run: bool,
    pub sink: Arc<dyn ExecSink>,
    pub current_task_id: Option<String>,
    remote: Arc<dyn Remote>,
    local: Arc<dyn LocalStack>,
    report: RunReport,
}

impl ExecCtx {
    pub fn new(
        dry_run: bool,
        sink: Arc<dyn ExecSink>,
        remote: Arc<dyn Remote>,
        local: Arc<dyn LocalStack>,
    ) -> Self {
        Self {
            dry_run,
            sink,
            current_task_id: None,
            remote,
            local,
            report: RunReport::default(),
        }
    }

    pub fn set_task(&mut self, id: impl Into<String>) {
        self.current_task_id = Some(id.into());
    }

    pub fn log(&self, msg: &str) {
        let id = self
            .current_task_id
            .clone()
            .unwrap_or_else(|| "<none>".into());
        self.sink.emit(ExecEvent::TaskLog {
            id,
            line: msg.to_string(),
        });
    }

    pub fn remote(&self) -> &dyn Remote {
        self.remote.as_ref()
    }

    pub fn local(&self) -> &dyn LocalStack {
        self.local.as_ref()
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn report_mut(&mut self) -> &mut RunReport {
        &mut self.report
    }

    /// Runs one remote command and forwards its stdout to the sink.
    pub fn run(&self, cmd: &ShellCommand) -> Result<RemoteOutput> {
        let rendered = cmd.render();
        tracing::debug!(
            step = self.current_task_id.as_deref().unwrap_or(""),
            command = %rendered,
            "remote"
        );
        self.log(&format!("$ {}", sanitize_log_line(&rendered)));
        let out = self.remote.execute(cmd)?;
        for line in sanitize_output(&out.stdout) {
            self.log(&line);
        }
        Ok(out)
    }

    pub fn probe(&self, cmd: &ShellCommand) -> Result<bool> {
        tracing::debug!(command = %cmd, "probe");
        remote::probe(self.remote.as_ref(), cmd)
    }

    /// Like [`ExecCtx::run`], but docker reporting the container as already
    /// absent (or already stopped) is logged and treated as success.
    pub fn run_allow_absent(&self, cmd: &ShellCommand) -> Result<()> {
        match self.run(cmd) {
            Ok(_) => Ok(()),
            Err(e) if e.is_container_absent() => {
                tracing::warn!(command = %cmd, error = %e, "tolerated failure");
                self.log(&format!("ignored: {}", sanitize_log_line(&e.to_string())));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Default)]
pub struct TaskRegistry {
    exec: BTreeMap<&'static str, TaskExecFn>,
}

impl TaskRegistry {
    pub fn add(&mut self, id: &'static str, f: TaskExecFn) -> Result<()> {
        if self.exec.contains_key(id) {
            return Err(Error::msg(format!("duplicate task executor for '{id}'")));
        }
        self.exec.insert(id, f);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<TaskExecFn> {
        self.exec.get(id).copied()
    }
}

pub trait ModuleExec {
    fn register_tasks(reg: &mut TaskRegistry) -> Result<()>;
}

/// Runs the plan's tasks one at a time, stopping at the first failure.
///
/// A failure is returned as [`Error::Step`] naming the task; earlier steps
/// are not undone.
pub fn execute_plan(
    inv: &Invocation,
    plan: &Plan,
    reg: &TaskRegistry,
    ctx: &mut ExecCtx,
) -> Result<()> {
    let ordered = plan.ordered()?;
    for task in &ordered {
        if reg.get(&task.id).is_none() {
            return Err(Error::msg(format!(
                "no executor registered for task '{}'",
                task.id
            )));
        }
    }

    for task in ordered {
        let Some(exec) = reg.get(&task.id) else {
            continue;
        };
        ctx.sink.emit(ExecEvent::TaskStarted {
            id: task.id.clone(),
        });
        ctx.set_task(task.id.clone());

        if ctx.dry_run {
            ctx.log(&format!("DRY-RUN: {} ({})", task.label, task.module));
            ctx.sink.emit(ExecEvent::TaskFinished {
                id: task.id.clone(),
                ok: true,
                error: None,
                elapsed_ms: 0,
            });
            continue;
        }

        tracing::info!(step = %task.id, env = %inv.env.name, "step started");
        let start = Instant::now();
        let res = exec(inv, ctx);
        let elapsed_ms = start.elapsed().as_millis();

        match res {
            Ok(()) => {
                tracing::info!(step = %task.id, elapsed_ms = %elapsed_ms, "step finished");
                ctx.sink.emit(ExecEvent::TaskFinished {
                    id: task.id.clone(),
                    ok: true,
                    error: None,
                    elapsed_ms,
                });
            }
            Err(e) => {
                tracing::error!(step = %task.id, error = %e, "step failed");
                ctx.sink.emit(ExecEvent::TaskFinished {
                    id: task.id.clone(),
                    ok: false,
                    error: Some(e.to_string()),
                    elapsed_ms,
                });
                let err = Error::Step {
                    step: task.id.clone(),
                    source: Box::new(e),
                };
                ctx.sink.emit(ExecEvent::ExecutorDone {
                    ok: false,
                    error: Some(err.to_string()),
                });
                return Err(err);
            }
        }
    }

    ctx.sink.emit(ExecEvent::ExecutorDone {
        ok: true,
        error: None,
    });
    Ok(())
}

pub fn builtin_registry() -> Result<TaskRegistry> {
    use crate::modules::{backup, core, deploy, environment, routing};

    let mut reg = TaskRegistry::default();
    core::CoreModule::register_tasks(&mut reg)?;
    environment::EnvironmentModule::register_tasks(&mut reg)?;
    routing::RoutingModule::register_tasks(&mut reg)?;
    backup::BackupModule::register_tasks(&mut reg)?;
    deploy::DeployModule::register_tasks(&mut reg)?;
    Ok(reg)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;
    use crate::config::{Config, ConfigDoc, Overrides};
    use crate::invocation::{Operation, Request};
    use crate::local::RecordingStack;
    use crate::planner::Task;
    use crate::remote::RecordingRemote;

    fn invocation() -> Invocation {
        let config = Config::from_doc(
            ConfigDoc {
                path: PathBuf::from("<mem>"),
                value: json!({ "vpsHost": "vps", "sshUser": "root", "domain": "example.com" }),
            },
            &Overrides::default(),
        )
        .unwrap();
        Invocation::build(
            Request::new(Operation::Create, Some("t".into())),
            config,
            "/work",
        )
        .unwrap()
    }

    fn ok_step(_inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
        ctx.run(&ShellCommand::new("true")).map(|_| ())
    }

    fn failing_step(_inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
        ctx.run(&ShellCommand::new("false")).map(|_| ())
    }

    fn setup(
        dry_run: bool,
    ) -> (
        Arc<RecordingRemote>,
        mpsc::Receiver<ExecEvent>,
        ExecCtx,
    ) {
        let remote = Arc::new(RecordingRemote::new());
        remote.fail_on("false", 1, "boom");
        let (tx, rx) = mpsc::channel();
        let ctx = ExecCtx::new(
            dry_run,
            Arc::new(ChannelSink::new(tx)),
            remote.clone(),
            Arc::new(RecordingStack::new()),
        );
        (remote, rx, ctx)
    }

    fn plan() -> (Plan, TaskRegistry) {
        let mut plan = Plan::default();
        plan.add(Task::new("t.one", "One", "t", "x")).unwrap();
        plan.add(Task::new("t.two", "Two", "t", "x").after(&["t.one"]))
            .unwrap();
        plan.add(Task::new("t.three", "Three", "t", "x").after(&["t.two"]))
            .unwrap();
        let mut reg = TaskRegistry::default();
        reg.add("t.one", ok_step).unwrap();
        reg.add("t.two", failing_step).unwrap();
        reg.add("t.three", ok_step).unwrap();
        (plan, reg)
    }

    #[test]
    fn failure_stops_the_run_and_names_the_step() {
        let (remote, rx, mut ctx) = setup(false);
        let (plan, reg) = plan();
        let err = execute_plan(&invocation(), &plan, &reg, &mut ctx).unwrap_err();

        assert!(matches!(&err, Error::Step { step, .. } if step == "t.two"), "{err:?}");
        assert_eq!(remote.commands(), vec!["true", "false"]);

        let events: Vec<_> = rx.try_iter().collect();
        let failed = events.iter().find_map(|e| match e {
            ExecEvent::TaskFinished {
                id,
                ok: false,
                error,
                ..
            } => Some((id.clone(), error.clone().unwrap_or_default())),
            _ => None,
        });
        let (id, error) = failed.expect("a failed step event");
        assert_eq!(id, "t.two");
        assert!(error.ends_with("false: boom"), "{error}");
        assert!(!events
            .iter()
            .any(|e| matches!(e, ExecEvent::TaskStarted { id } if id == "t.three")));
    }

    #[test]
    fn dry_run_issues_no_commands() {
        let (remote, rx, mut ctx) = setup(true);
        let (plan, reg) = plan();
        execute_plan(&invocation(), &plan, &reg, &mut ctx).unwrap();
        assert!(remote.calls().is_empty());
        assert!(rx.try_iter().any(|e| matches!(e, ExecEvent::ExecutorDone { ok: true, .. })));
    }

    #[test]
    fn missing_executor_fails_before_any_step() {
        let (remote, _rx, mut ctx) = setup(false);
        let (mut plan, reg) = plan();
        plan.add(Task::new("t.orphan", "Orphan", "t", "x")).unwrap();
        assert!(execute_plan(&invocation(), &plan, &reg, &mut ctx).is_err());
        assert!(remote.calls().is_empty());
    }

    #[test]
    fn absent_targets_are_tolerated() {
        let (_remote, _rx, ctx) = setup(false);
        let remote = RecordingRemote::new();
        remote.fail_on("docker rm", 1, "Error: No such container: pb-t");
        remote.fail_on("docker stop", 1, "Error response from daemon: container pb-t is not running");
        remote.fail_on("docker start", 1, "permission denied");
        let ctx = ExecCtx {
            remote: Arc::new(remote),
            ..ctx
        };
        assert!(ctx
            .run_allow_absent(&ShellCommand::new("docker").lit("rm").arg("pb-t"))
            .is_ok());
        assert!(ctx
            .run_allow_absent(&ShellCommand::new("docker").lit("stop").arg("pb-t"))
            .is_ok());
        assert!(ctx
            .run_allow_absent(&ShellCommand::new("docker").lit("start").arg("pb-t"))
            .is_err());
    }

    #[test]
    fn unreachable_host_is_never_tolerated() {
        let (_remote, _rx, ctx) = setup(false);
        let remote = RecordingRemote::new();
        remote.fail_on(
            "docker rm",
            255,
            "Warning: Identity file /root/.ssh/pb not accessible: No such file or directory.",
        );
        let ctx = ExecCtx {
            remote: Arc::new(remote),
            ..ctx
        };
        let err = ctx
            .run_allow_absent(&ShellCommand::new("docker").lit("rm").lit("-f").arg("pb-t"))
            .unwrap_err();
        assert_eq!(err.remote_code(), Some(255));
    }

    #[test]
    fn report_keeps_named_outputs() {
        let mut report = RunReport::default();
        report.set(REMOTE_ARCHIVE, "/tmp/x-backup.tar.gz");
        report.set(SHA256, "abc");
        assert_eq!(report.get(REMOTE_ARCHIVE), Some("/tmp/x-backup.tar.gz"));
        assert_eq!(report.remove(REMOTE_ARCHIVE).as_deref(), Some("/tmp/x-backup.tar.gz"));
        assert_eq!(report.iter().collect::<Vec<_>>(), vec![(SHA256, "abc")]);
    }
}
