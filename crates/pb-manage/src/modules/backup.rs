//! Backup, restore and pull.
//!
//! All three move the same artifact: a gzip'd tar whose root is the contents
//! of the environment's data directory.

use std::fs;

use crate::archive;
use crate::error::{Error, Result};
use crate::executor::{ExecCtx, LOCAL_ARCHIVE, ModuleExec, REMOTE_ARCHIVE, SHA256, TaskRegistry};
use crate::invocation::{Invocation, Operation};
use crate::modules::core::PREFLIGHT;
use crate::modules::environment::{self, NETWORK};
use crate::modules::{DATA_READY, MIGRATED, Module, RUNNING};
use crate::planner::{Plan, Task};
use crate::shell::ShellCommand;

pub const ARCHIVE: &str = "backup.archive";
pub const DOWNLOAD: &str = "backup.download";
pub const CLEANUP_REMOTE: &str = "backup.cleanup-remote";

pub const CHECK_ARCHIVE: &str = "restore.check-archive";
pub const UPLOAD: &str = "restore.upload";
pub const STOP: &str = "restore.stop";
pub const EXTRACT: &str = "restore.extract";
pub const RESTART: &str = "restore.restart";
pub const RESTORE_CLEANUP: &str = "restore.cleanup";

pub const CHECK_RUNTIME: &str = "pull.check-runtime";
pub const STOP_LOCAL: &str = "pull.stop-local";
pub const REPLACE_DATA: &str = "pull.replace-data";
pub const START_LOCAL: &str = "pull.start-local";

pub struct BackupModule;

impl Module for BackupModule {
    fn id(&self) -> &'static str {
        "backup"
    }

    fn detect(&self, inv: &Invocation) -> bool {
        matches!(
            inv.op,
            Operation::Backup | Operation::Restore | Operation::Pull
        )
    }

    fn plan(&self, inv: &Invocation, plan: &mut Plan) -> Result<()> {
        match inv.op {
            Operation::Backup => plan_backup(self.id(), inv, plan),
            Operation::Pull => {
                plan.add(
                    Task::new(CHECK_RUNTIME, "Check local container runtime", "pull", "check")
                        .after(&[PREFLIGHT]),
                )?;
                plan_backup(self.id(), inv, plan)?;
                plan.add(
                    Task::new(STOP_LOCAL, "Stop local stack", "pull", "local")
                        .after(&[CLEANUP_REMOTE]),
                )?;
                plan.add(
                    Task::new(REPLACE_DATA, "Replace local data", "pull", "local")
                        .after(&[STOP_LOCAL]),
                )?;
                plan.add(
                    Task::new(START_LOCAL, "Start local stack", "pull", "local")
                        .after(&[REPLACE_DATA]),
                )
            }
            Operation::Restore => {
                let m = "restore";
                plan.add(
                    Task::new(CHECK_ARCHIVE, "Check local archive", m, "check")
                        .after(&[PREFLIGHT]),
                )?;
                plan.add(Task::new(UPLOAD, "Upload archive", m, "transfer").after(&[CHECK_ARCHIVE]))?;
                plan.add(Task::new(STOP, "Stop container", m, "stop").after(&[UPLOAD]))?;
                plan.add(
                    Task::new(EXTRACT, "Replace data directory", m, "extract")
                        .after(&[STOP])
                        .provides(&[DATA_READY]),
                )?;
                plan.add(
                    Task::new(RESTART, "Restart container", m, "start")
                        .after(&[NETWORK])
                        .provides(&[RUNNING]),
                )?;
                plan.add(
                    Task::new(RESTORE_CLEANUP, "Remove uploaded archive", m, "cleanup")
                        .after(&[MIGRATED]),
                )
            }
            _ => Ok(()),
        }
    }
}

fn plan_backup(module: &str, inv: &Invocation, plan: &mut Plan) -> Result<()> {
    plan.add(
        Task::new(ARCHIVE, "Archive data directory", module, "archive")
            .after(&[PREFLIGHT, "pull.check-runtime?"]),
    )?;
    if !inv.downloads() {
        return Ok(());
    }
    plan.add(Task::new(DOWNLOAD, "Download archive", module, "transfer").after(&[ARCHIVE]))?;
    if inv.op == Operation::Pull || !inv.backup.keep_remote {
        plan.add(
            Task::new(CLEANUP_REMOTE, "Remove remote archive", module, "cleanup")
                .after(&[DOWNLOAD]),
        )?;
    }
    Ok(())
}

impl ModuleExec for BackupModule {
    fn register_tasks(reg: &mut TaskRegistry) -> Result<()> {
        reg.add(ARCHIVE, exec_archive)?;
        reg.add(DOWNLOAD, exec_download)?;
        reg.add(CLEANUP_REMOTE, exec_cleanup_remote)?;
        reg.add(CHECK_ARCHIVE, exec_check_archive)?;
        reg.add(UPLOAD, exec_upload)?;
        reg.add(STOP, exec_stop)?;
        reg.add(EXTRACT, exec_extract)?;
        reg.add(RESTART, exec_restart)?;
        reg.add(RESTORE_CLEANUP, exec_restore_cleanup)?;
        reg.add(CHECK_RUNTIME, exec_check_runtime)?;
        reg.add(STOP_LOCAL, exec_stop_local)?;
        reg.add(REPLACE_DATA, exec_replace_data)?;
        reg.add(START_LOCAL, exec_start_local)?;
        Ok(())
    }
}

fn exec_archive(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let layout = &inv.config.layout;
    ctx.run(
        &ShellCommand::new("mkdir")
            .lit("-p")
            .path(&layout.tmp_dir)
            .and(
                ShellCommand::new("tar")
                    .lit("-czf")
                    .path(&inv.env.remote_backup)
                    .lit("-C")
                    .path(&inv.env.data_dir)
                    .lit("."),
            ),
    )?;
    if !inv.downloads() {
        ctx.log(&format!(
            "Backup stored on server at {}",
            inv.env.remote_backup
        ));
    }
    ctx.report_mut()
        .set(REMOTE_ARCHIVE, inv.env.remote_backup.to_string());
    Ok(())
}

fn exec_download(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let local = inv.local_archive();
    if let Some(parent) = local.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::path(parent, e))?;
    }
    ctx.remote()
        .copy_from_remote(&inv.env.remote_backup, &local)?;
    let digest = archive::sha256_file(&local)?;
    ctx.log(&format!("saved {} (sha256 {digest})", local.display()));
    ctx.report_mut()
        .set(LOCAL_ARCHIVE, local.display().to_string());
    ctx.report_mut().set(SHA256, digest);
    Ok(())
}

fn exec_cleanup_remote(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    ctx.run(&ShellCommand::new("rm").lit("-f").path(&inv.env.remote_backup))?;
    ctx.report_mut().remove(REMOTE_ARCHIVE);
    Ok(())
}

fn exec_check_archive(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let Some(path) = inv.archive.as_deref() else {
        return Err(Error::Invocation(
            "usage: pb-manage restore <env> <archive>".into(),
        ));
    };
    match fs::metadata(path) {
        Ok(m) if m.is_file() => {}
        _ => {
            return Err(Error::Precondition(format!(
                "File not found: {}",
                path.display()
            )));
        }
    }
    let digest = archive::sha256_file(path)?;
    ctx.log(&format!("{} (sha256 {digest})", path.display()));
    ctx.report_mut().set(SHA256, digest);
    Ok(())
}

fn exec_upload(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let Some(path) = inv.archive.as_deref() else {
        return Err(Error::Invocation(
            "usage: pb-manage restore <env> <archive>".into(),
        ));
    };
    let upload = &inv.env.remote_upload;
    ctx.remote().copy_to_remote(path, upload)?;

    let expected = match ctx.report().get(SHA256) {
        Some(d) => d.to_string(),
        None => archive::sha256_file(path)?,
    };
    let out = ctx.run(&ShellCommand::new("sha256sum").path(upload))?;
    let actual = out.stdout.split_whitespace().next().unwrap_or_default();
    if !actual.eq_ignore_ascii_case(&expected) {
        return Err(Error::msg(format!(
            "uploaded archive {upload} does not match local checksum (expected {expected}, got {actual})"
        )));
    }
    ctx.log(&format!("verified {upload}"));
    Ok(())
}

fn exec_stop(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    ctx.run_allow_absent(
        &ShellCommand::new("docker")
            .lit("stop")
            .arg(&inv.env.container),
    )
}

fn exec_extract(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let data_dir = &inv.env.data_dir;
    ctx.run(
        &ShellCommand::new("rm")
            .lit("-rf")
            .path(data_dir)
            .and(ShellCommand::new("mkdir").lit("-p").path(data_dir))
            .and(
                ShellCommand::new("tar")
                    .lit("-xzf")
                    .path(&inv.env.remote_upload)
                    .lit("-C")
                    .path(data_dir),
            ),
    )?;
    Ok(())
}

fn exec_restart(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let exists = ctx.probe(
        &ShellCommand::new("docker")
            .lit("container")
            .lit("inspect")
            .arg(&inv.env.container)
            .quiet(),
    )?;
    if exists {
        ctx.run(
            &ShellCommand::new("docker")
                .lit("start")
                .arg(&inv.env.container),
        )?;
    } else {
        ctx.log(&format!("{} does not exist, creating it", inv.env.container));
        ctx.run(&environment::run_container_cmd(inv))?;
    }
    Ok(())
}

fn exec_restore_cleanup(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    ctx.run(&ShellCommand::new("rm").lit("-f").path(&inv.env.remote_upload))?;
    Ok(())
}

fn exec_check_runtime(_inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    ctx.local().check_runtime()
}

fn exec_stop_local(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let res = {
        let log = |line: &str| ctx.log(line);
        ctx.local().compose_down(&inv.local_root, &log)
    };
    if let Err(e) = res {
        tracing::warn!(error = %e, "docker compose down failed");
        ctx.log(&format!("ignored: {e}"));
    }
    Ok(())
}

fn exec_replace_data(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let local = inv.local_archive();
    let target = inv.local_data_dir();
    archive::replace_dir(&local, &target)?;
    ctx.log(&format!("{} replaced from {}", target.display(), local.display()));
    Ok(())
}

fn exec_start_local(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let log = |line: &str| ctx.log(line);
    ctx.local().compose_up(&inv.local_root, &log)
}
