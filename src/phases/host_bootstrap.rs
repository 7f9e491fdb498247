use anyhow::Result;

use crate::bootstrap;
use crate::engine::{Orchestrator, Phase, target};
use crate::ui;

/// Reset every host and prepare the service account and directories.
pub struct HostBootstrap;

impl Phase for HostBootstrap {
    fn name(&self) -> &'static str {
        "host-bootstrap"
    }

    fn description(&self) -> &'static str {
        "prepare service account and data directories"
    }

    fn steps(&self) -> usize {
        3
    }

    fn run(&self, ctx: &mut Orchestrator) -> Result<()> {
        let plan = ctx.plan()?;
        let account = &ctx.config.account;

        ctx.refresh_sessions(&ctx.targets()?);

        ctx.step("Clearing leftovers of earlier installs");
        for assignment in &plan.hosts {
            let host = target(&assignment.host);
            bootstrap::reset_host(&ctx.pool, &host, account, &assignment.directories)?;
        }

        ctx.step(&format!("Ensuring account {}:{}", account.user, account.group));
        for assignment in &plan.hosts {
            let host = target(&assignment.host);
            bootstrap::ensure_host(&ctx.pool, &host, assignment, account, ctx.account_secret())?;
        }

        ctx.step("Verifying directory ownership");
        if ctx.dry_run() {
            ui::dim("[dry-run] skipped; directories were not created");
            return Ok(());
        }
        for assignment in &plan.hosts {
            let host = target(&assignment.host);
            bootstrap::verify_ownership(&ctx.pool, &host, &assignment.directories, &account.user)?;
        }
        Ok(())
    }
}
