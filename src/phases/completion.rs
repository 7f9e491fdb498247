use anyhow::{Context, Result};
use remotekit::RemoteCommand;

use crate::engine::{Orchestrator, Phase, target};
use crate::ui;

/// Confirm the database answers and print the installation summary.
pub struct Completion;

impl Phase for Completion {
    fn name(&self) -> &'static str {
        "completion"
    }

    fn description(&self) -> &'static str {
        "verify the cluster and summarize"
    }

    fn steps(&self) -> usize {
        2
    }

    fn run(&self, ctx: &mut Orchestrator) -> Result<()> {
        let plan = ctx.plan()?;
        let coordinator = target(plan.coordinator());
        let settings = &ctx.config.cluster.settings;
        ctx.refresh_sessions(std::slice::from_ref(&coordinator));

        ctx.step(&format!("Verifying database connectivity on {coordinator}"));
        if ctx.dry_run() {
            ui::dim("[dry-run] skipped; no cluster was started");
        } else {
            let port = settings.coordinator_port.to_string();
            let mut query = RemoteCommand::inspect("psql")
                .args(["-p", port.as_str(), "-d", settings.database_name.as_str()])
                .args(["-At", "-c", "SELECT 1"])
                .run_as(ctx.config.account.user.as_str());
            if let Some(env_file) = &ctx.config.bootstrap.env_file {
                query = query.source_env(env_file.as_str());
            }
            ctx.pool
                .run(&coordinator, &query)
                .with_context(|| format!("database {} is not answering", settings.database_name))?;
        }

        ctx.step("Summary");
        ui::header("Installation summary");
        ui::kv("Coordinator", &plan.coordinator().to_string());
        if let Some(standby) = plan.standby() {
            ui::kv("Standby", &standby.to_string());
        }
        ui::kv(
            "Segments",
            &format!(
                "{} on {} machine(s)",
                plan.segments.len(),
                plan.segment_machines().len()
            ),
        );
        ui::kv(
            "Mirrors",
            plan.mirrors_skipped
                .as_deref()
                .map_or("yes", |reason| reason),
        );
        ui::kv(
            "Database",
            &format!("{} on port {}", settings.database_name, settings.coordinator_port),
        );

        let degraded = ctx.pool.degraded_hosts();
        if !degraded.is_empty() {
            ui::warn(&format!("Degraded hosts (one-off connections): {}", degraded.join(", ")));
        }
        for skipped in ctx.skipped_extensions() {
            ui::warn(&format!("{} not installed on {}", skipped.package, skipped.host));
        }
        if ctx.dry_run() {
            ui::info("Dry run complete; no host was changed");
        } else {
            ui::success("Cluster installed");
        }
        Ok(())
    }
}
