use anyhow::{Context, Result};
use clusterkit::ClusterPlan;
use colored::Colorize;

use crate::engine::{Orchestrator, Phase};
use crate::{paths, ui};

/// Validate the configuration and generate the bootstrap artifact.
pub struct Init;

impl Phase for Init {
    fn name(&self) -> &'static str {
        "init"
    }

    fn description(&self) -> &'static str {
        "plan the cluster layout"
    }

    fn steps(&self) -> usize {
        3
    }

    fn run(&self, ctx: &mut Orchestrator) -> Result<()> {
        ctx.step("Validating configuration");
        ctx.config.validate()?;

        ctx.step("Computing cluster plan");
        let plan = clusterkit::generate(&ctx.config.topology())?;
        if let Some(reason) = &plan.mirrors_skipped {
            ui::warn(&format!("Mirrors disabled: {reason}"));
        }

        ctx.step("Writing bootstrap configuration");
        let dir = paths::artifacts_dir(ctx.state_dir());
        let written = plan
            .artifact
            .write_to(&dir)
            .with_context(|| format!("Failed to write artifacts to {}", dir.display()))?;
        ui::kv("Config", &written.config.display().to_string());
        ui::kv("Machine list", &written.machine_list.display().to_string());
        print_topology(&plan);

        ctx.set_plan(plan);
        ctx.set_artifacts(written);
        Ok(())
    }

    fn rehydrate(&self, ctx: &mut Orchestrator) -> Result<()> {
        let plan = clusterkit::generate(&ctx.config.topology())
            .context("Failed to recompute the cluster plan")?;
        let written = plan
            .artifact
            .write_to(&paths::artifacts_dir(ctx.state_dir()))
            .context("Failed to restore bootstrap artifacts")?;
        ctx.set_plan(plan);
        ctx.set_artifacts(written);
        Ok(())
    }
}

/// Print hosts with their roles and each segment's placement.
pub fn print_topology(plan: &ClusterPlan) {
    ui::section("Hosts");
    for assignment in &plan.hosts {
        let roles: Vec<String> = assignment.roles.iter().map(ToString::to_string).collect();
        println!(
            "  {} {}",
            assignment.host.to_string().bold(),
            format!("({})", roles.join(", ")).dimmed()
        );
    }

    ui::section("Segments");
    for segment in &plan.segments {
        let mirror = segment.mirror.as_ref().map_or_else(
            || "no mirror".dimmed().to_string(),
            |m| format!("mirror {}:{}", m.host.machine(), m.directory),
        );
        println!(
            "  {:>3}  {}:{}  {} {}",
            segment.index,
            segment.host.machine(),
            segment.directory,
            "→".cyan(),
            mirror
        );
    }
    if let Some(reason) = &plan.mirrors_skipped {
        ui::dim(&format!("mirrors skipped: {reason}"));
    }
}
