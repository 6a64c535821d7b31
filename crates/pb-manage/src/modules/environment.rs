//! Container, network and data directory of one environment.

use crate::error::Result;
use crate::executor::{ExecCtx, ModuleExec, TaskRegistry};
use crate::invocation::{Invocation, Operation};
use crate::modules::core::PREFLIGHT;
use crate::modules::{DATA_READY, MIGRATED, Module, REMOVED, RUNNING, SEEDED};
use crate::planner::{Plan, Task};
use crate::shell::{ShellCommand, Word};

pub const PROVISION: &str = "env.provision";
pub const NETWORK: &str = "env.network";
pub const START: &str = "env.start";
pub const MIGRATE: &str = "env.migrate";
pub const SEED: &str = "env.seed";
pub const REMOVE_CONTAINER: &str = "env.remove-container";
pub const REMOVE_DATA: &str = "env.remove-data";

/// Mount point of the data directory inside the service container.
pub const CONTAINER_DATA_DIR: &str = ":/pb/pb_data";

pub struct EnvironmentModule;

impl Module for EnvironmentModule {
    fn id(&self) -> &'static str {
        "env"
    }

    fn detect(&self, inv: &Invocation) -> bool {
        matches!(
            inv.op,
            Operation::Create | Operation::Deploy | Operation::Destroy | Operation::Restore
        )
    }

    fn plan(&self, inv: &Invocation, plan: &mut Plan) -> Result<()> {
        let id = self.id();
        match inv.op {
            Operation::Create | Operation::Deploy => {
                plan.add(
                    Task::new(PROVISION, "Provision data directory", id, "provision")
                        .after(&[PREFLIGHT])
                        .provides(&[DATA_READY]),
                )?;
                plan.add(network_task(id))?;
                plan.add(
                    Task::new(START, "Start container", id, "start")
                        .after(&[NETWORK])
                        .provides(&[RUNNING]),
                )?;
                plan.add(migrate_task(id))?;
                plan.add(
                    Task::new(SEED, "Seed data", id, "seed")
                        .after(&[MIGRATE])
                        .provides(&[SEEDED]),
                )?;
            }
            Operation::Restore => {
                plan.add(network_task(id))?;
                plan.add(migrate_task(id))?;
            }
            Operation::Destroy => {
                plan.add(
                    Task::new(REMOVE_CONTAINER, "Remove container", id, "teardown")
                        .after(&[PREFLIGHT]),
                )?;
                plan.add(
                    Task::new(REMOVE_DATA, "Remove data directory", id, "teardown")
                        .after(&[REMOVE_CONTAINER])
                        .provides(&[REMOVED]),
                )?;
            }
            Operation::Backup | Operation::Pull => {}
        }
        Ok(())
    }
}

fn network_task(module: &str) -> Task {
    Task::new(NETWORK, "Ensure shared network", module, "network").after(&[DATA_READY])
}

fn migrate_task(module: &str) -> Task {
    Task::new(MIGRATE, "Apply migrations", module, "migrate")
        .after(&[RUNNING])
        .provides(&[MIGRATED])
}

impl ModuleExec for EnvironmentModule {
    fn register_tasks(reg: &mut TaskRegistry) -> Result<()> {
        reg.add(PROVISION, exec_provision)?;
        reg.add(NETWORK, exec_network)?;
        reg.add(START, exec_start)?;
        reg.add(MIGRATE, exec_migrate)?;
        reg.add(SEED, exec_seed)?;
        reg.add(REMOVE_CONTAINER, exec_remove_container)?;
        reg.add(REMOVE_DATA, exec_remove_data)?;
        Ok(())
    }
}

/// `docker run -d --name <container> --network <net> -v <data>:/pb/pb_data <image>`
pub(crate) fn run_container_cmd(inv: &Invocation) -> ShellCommand {
    ShellCommand::new("docker")
        .lit("run")
        .lit("-d")
        .lit("--name")
        .arg(&inv.env.container)
        .lit("--network")
        .arg(&inv.env.network)
        .lit("-v")
        .word(Word::new().path(&inv.env.data_dir).lit(CONTAINER_DATA_DIR))
        .arg(&inv.config.image)
}

fn docker_exec(inv: &Invocation, args: [&'static str; 3]) -> ShellCommand {
    let [a, b, c] = args;
    ShellCommand::new("docker")
        .lit("exec")
        .arg(&inv.env.container)
        .lit(a)
        .lit(b)
        .lit(c)
}

fn exec_provision(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let layout = &inv.config.layout;
    let data_dir = &inv.env.data_dir;

    let has_base = ctx.probe(
        &ShellCommand::new("test")
            .lit("-d")
            .path(&layout.base_template),
    )?;
    ctx.run(&ShellCommand::new("rm").lit("-rf").path(data_dir))?;

    if has_base {
        ctx.log(&format!("cloning base template {}", layout.base_template));
        ctx.run(
            &ShellCommand::new("mkdir")
                .lit("-p")
                .path(&layout.data_root)
                .and(
                    ShellCommand::new("cp")
                        .lit("-R")
                        .path(&layout.base_template)
                        .path(data_dir),
                ),
        )?;
    } else {
        ctx.log("no base template, starting empty");
        ctx.run(&ShellCommand::new("mkdir").lit("-p").path(data_dir))?;
    }
    Ok(())
}

fn exec_network(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let net = &inv.env.network;
    ctx.run(
        &ShellCommand::new("docker")
            .lit("network")
            .lit("inspect")
            .arg(net)
            .quiet()
            .or(ShellCommand::new("docker")
                .lit("network")
                .lit("create")
                .arg(net)),
    )?;
    Ok(())
}

fn remove_container_cmd(inv: &Invocation) -> ShellCommand {
    ShellCommand::new("docker")
        .lit("rm")
        .lit("-f")
        .arg(&inv.env.container)
}

fn exec_start(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    ctx.run_allow_absent(&remove_container_cmd(inv))?;
    ctx.run(&run_container_cmd(inv))?;
    Ok(())
}

fn exec_migrate(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    ctx.run(&docker_exec(inv, ["pocketbase", "migrate", "up"]))?;
    Ok(())
}

fn exec_seed(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    ctx.run(&docker_exec(inv, ["pocketbase", "seed", "up"]))?;
    Ok(())
}

fn exec_remove_container(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    ctx.run_allow_absent(&remove_container_cmd(inv))
}

fn exec_remove_data(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    ctx.run(&ShellCommand::new("rm").lit("-rf").path(&inv.env.data_dir))?;
    Ok(())
}
