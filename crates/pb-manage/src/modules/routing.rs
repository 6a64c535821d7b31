//! nginx virtual host per environment.

use crate::config::Layout;
use crate::error::Result;
use crate::executor::{ExecCtx, ModuleExec, TaskRegistry};
use crate::invocation::{Invocation, Operation};
use crate::modules::{Module, REMOVED, ROUTE_CHANGED, SEEDED};
use crate::naming::{Domain, EnvName};
use crate::planner::{Plan, Task};
use crate::shell::ShellCommand;

pub const PUBLISH: &str = "route.publish";
pub const RETRACT: &str = "route.retract";
pub const RELOAD: &str = "route.reload";

/// Server block routing `<name>.<domain>` to the environment's container.
pub fn render_rule(name: &EnvName, domain: &Domain, layout: &Layout) -> String {
    let container = format!("{}{}", layout.container_prefix, name);
    format!(
        "server {{
    listen 80;
    server_name {name}.{domain};
    location / {{
        proxy_pass http://{container}:{port};
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
    }}
}}
",
        port = layout.service_port,
    )
}

pub struct RoutingModule;

impl Module for RoutingModule {
    fn id(&self) -> &'static str {
        "route"
    }

    fn detect(&self, inv: &Invocation) -> bool {
        matches!(
            inv.op,
            Operation::Create | Operation::Deploy | Operation::Destroy
        )
    }

    fn plan(&self, inv: &Invocation, plan: &mut Plan) -> Result<()> {
        let id = self.id();
        if inv.op == Operation::Destroy {
            plan.add(
                Task::new(RETRACT, "Remove routing rule", id, "retract")
                    .after(&[REMOVED])
                    .provides(&[ROUTE_CHANGED]),
            )?;
        } else {
            plan.add(
                Task::new(PUBLISH, "Write routing rule", id, "publish")
                    .after(&[SEEDED])
                    .provides(&[ROUTE_CHANGED]),
            )?;
        }
        plan.add(Task::new(RELOAD, "Reload proxy", id, "reload").after(&[ROUTE_CHANGED]))
    }
}

impl ModuleExec for RoutingModule {
    fn register_tasks(reg: &mut TaskRegistry) -> Result<()> {
        reg.add(PUBLISH, exec_publish)?;
        reg.add(RETRACT, exec_retract)?;
        reg.add(RELOAD, exec_reload)?;
        Ok(())
    }
}

fn exec_publish(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let rule = render_rule(&inv.env.name, &inv.config.domain, &inv.config.layout);
    ctx.log(&format!("{} -> {}", inv.env.vhost, inv.env.rule_path));
    ctx.run(
        &ShellCommand::new("printf")
            .arg("%s")
            .arg(rule)
            .write_to(&inv.env.rule_path),
    )?;
    Ok(())
}

fn exec_retract(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    ctx.run(&ShellCommand::new("rm").lit("-f").path(&inv.env.rule_path))?;
    Ok(())
}

fn exec_reload(_inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    ctx.run(&ShellCommand::new("nginx").lit("-s").lit("reload"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_targets_vhost_and_container() {
        let rule = render_rule(
            &EnvName::parse("staging").unwrap(),
            &Domain::parse("example.com").unwrap(),
            &Layout::default(),
        );
        assert!(rule.contains("server_name staging.example.com;"), "{rule}");
        assert!(rule.contains("proxy_pass http://pb-staging:8090;"), "{rule}");
        assert!(rule.contains("proxy_set_header Host $host;"));
        assert!(rule.starts_with("server {\n"));
        assert!(rule.ends_with("}\n"));
    }

    #[test]
    fn publish_passes_rule_as_one_quoted_word() {
        let rule = render_rule(
            &EnvName::parse("qa").unwrap(),
            &Domain::parse("example.com").unwrap(),
            &Layout::default(),
        );
        let cmd = ShellCommand::new("printf")
            .arg("%s")
            .arg(rule.clone())
            .write_to(&Layout::default().proxy_conf_dir.join("pb-qa.conf"));
        let rendered = cmd.render();
        assert!(rendered.starts_with("printf '%s' 'server {\n"), "{rendered}");
        assert!(rendered.ends_with("' > '/etc/nginx/conf.d/pb-qa.conf'"), "{rendered}");
        assert!(rendered.contains("$host"));
    }
}
