use crate::error::Result;
use crate::executor::{ExecCtx, ModuleExec, TaskRegistry};
use crate::invocation::Invocation;
use crate::modules::Module;
use crate::planner::{Plan, Task};

pub const PREFLIGHT: &str = "core.preflight";

pub struct CoreModule;

impl Module for CoreModule {
    fn id(&self) -> &'static str {
        "core"
    }

    fn detect(&self, _inv: &Invocation) -> bool {
        true
    }

    fn plan(&self, _inv: &Invocation, plan: &mut Plan) -> Result<()> {
        plan.add(Task::new(PREFLIGHT, "Resolve target", self.id(), "preflight"))
    }
}

impl ModuleExec for CoreModule {
    fn register_tasks(reg: &mut TaskRegistry) -> Result<()> {
        reg.add(PREFLIGHT, exec_preflight)
    }
}

fn exec_preflight(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    ctx.log(&format!("{} {} on {}", inv.op, inv.env.name, ctx.remote().target()));
    ctx.log(&format!("container = {}", inv.env.container));
    ctx.log(&format!("data_dir = {}", inv.env.data_dir));
    ctx.log(&format!("vhost = {}", inv.env.vhost));
    tracing::info!(
        op = %inv.op,
        env = %inv.env.name,
        config = %inv.config.source.display(),
        "resolved invocation"
    );
    Ok(())
}
