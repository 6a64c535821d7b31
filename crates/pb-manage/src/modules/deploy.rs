use crate::error::{Error, Result};
use crate::executor::{ExecCtx, ModuleExec, TaskRegistry};
use crate::invocation::{Invocation, Operation};
use crate::modules::Module;
use crate::modules::routing::RELOAD;
use crate::planner::{Plan, Task};
use crate::shell::ShellCommand;

pub const VERIFY: &str = "deploy.verify";

/// Deploy is the create pipeline followed by a running-state check.
pub struct DeployModule;

impl Module for DeployModule {
    fn id(&self) -> &'static str {
        "deploy"
    }

    fn detect(&self, inv: &Invocation) -> bool {
        inv.op == Operation::Deploy
    }

    fn plan(&self, _inv: &Invocation, plan: &mut Plan) -> Result<()> {
        plan.add(Task::new(VERIFY, "Verify container is running", self.id(), "verify").after(&[RELOAD]))
    }
}

impl ModuleExec for DeployModule {
    fn register_tasks(reg: &mut TaskRegistry) -> Result<()> {
        reg.add(VERIFY, exec_verify)
    }
}

fn exec_verify(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let out = ctx.run(
        &ShellCommand::new("docker")
            .lit("container")
            .lit("inspect")
            .lit("-f")
            .arg("{{.State.Running}}")
            .arg(&inv.env.container),
    )?;
    match out.stdout.trim() {
        "true" => {
            ctx.log(&format!("{} is running at {}", inv.env.container, inv.env.vhost));
            Ok(())
        }
        other => Err(Error::msg(format!(
            "container {} is not running after deploy (state: {})",
            inv.env.container,
            if other.is_empty() { "unknown" } else { other }
        ))),
    }
}
