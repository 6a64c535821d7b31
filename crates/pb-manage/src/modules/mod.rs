use crate::error::Result;
use crate::executor::{ExecCtx, builtin_registry, execute_plan};
use crate::invocation::Invocation;
use crate::planner::Plan;

pub mod backup;
pub mod core;
pub mod deploy;
pub mod environment;
pub mod routing;

// Ordering tokens shared between modules.
pub(crate) const DATA_READY: &str = "env:data-ready";
pub(crate) const RUNNING: &str = "env:running";
pub(crate) const MIGRATED: &str = "env:migrated";
pub(crate) const SEEDED: &str = "env:seeded";
pub(crate) const REMOVED: &str = "env:removed";
pub(crate) const ROUTE_CHANGED: &str = "route:changed";

pub trait Module {
    fn id(&self) -> &'static str;
    fn detect(&self, inv: &Invocation) -> bool;
    fn plan(&self, inv: &Invocation, plan: &mut Plan) -> Result<()>;
}

pub fn builtin_modules() -> Vec<Box<dyn Module>> {
    vec![
        Box::new(core::CoreModule),
        Box::new(environment::EnvironmentModule),
        Box::new(routing::RoutingModule),
        Box::new(backup::BackupModule),
        Box::new(deploy::DeployModule),
    ]
}

pub fn build_plan(inv: &Invocation) -> Result<Plan> {
    let mut plan = Plan::default();
    for m in builtin_modules() {
        if m.detect(inv) {
            m.plan(inv, &mut plan)?;
        }
    }
    Ok(plan)
}

/// Plans and executes the invocation's operation.
pub fn run(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let plan = build_plan(inv)?;
    let reg = builtin_registry()?;
    execute_plan(inv, &plan, &reg, ctx)
}
