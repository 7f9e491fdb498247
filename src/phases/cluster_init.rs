use anyhow::{Context, Result};
use remotekit::RemoteCommand;
use std::fs;
use std::time::Duration;

use crate::engine::{Orchestrator, Phase, target};
use crate::{paths, progress, ui};

/// Upload the bootstrap artifact and run the cluster init tool on the
/// coordinator.
pub struct ClusterInit;

impl Phase for ClusterInit {
    fn name(&self) -> &'static str {
        "cluster-init"
    }

    fn description(&self) -> &'static str {
        "initialize the database cluster"
    }

    fn steps(&self) -> usize {
        3
    }

    fn run(&self, ctx: &mut Orchestrator) -> Result<()> {
        let plan = ctx.plan()?;
        let artifacts = ctx.artifacts()?;
        let coordinator = target(plan.coordinator());
        let settings = &ctx.config.cluster.settings;
        let account = &ctx.config.account;
        let config_path = settings.config_path();
        let machine_list_path = settings.machine_list_path();
        ctx.refresh_sessions(std::slice::from_ref(&coordinator));

        ctx.step(&format!("Uploading bootstrap configuration to {coordinator}"));
        ctx.pool
            .run(
                &coordinator,
                &RemoteCommand::new("mkdir").args(["-p", settings.work_dir.as_str()]),
            )
            .with_context(|| format!("creating {} on {coordinator}", settings.work_dir))?;
        for (local, remote) in [
            (&artifacts.config, &config_path),
            (&artifacts.machine_list, &machine_list_path),
        ] {
            ctx.pool
                .copy(&coordinator, local, remote)
                .with_context(|| format!("uploading {} to {coordinator}", local.display()))?;
        }
        let owner = format!("{}:{}", account.user, account.group);
        ctx.pool
            .run(
                &coordinator,
                &RemoteCommand::new("chown").args([
                    owner.as_str(),
                    config_path.as_str(),
                    machine_list_path.as_str(),
                ]),
            )
            .with_context(|| format!("handing the bootstrap files to {}", account.user))?;

        let bootstrap = &ctx.config.bootstrap;
        ctx.step(&format!("Running {} as {}", bootstrap.command, account.user));
        let mut command = RemoteCommand::new(bootstrap.command.as_str())
            .args(bootstrap.args.iter().map(String::as_str))
            .args(["-c", config_path.as_str()])
            .run_as(account.user.as_str())
            .accept_exit_codes(&bootstrap.accept_exit_codes);
        if let Some(standby) = plan.standby() {
            command = command.args(["-s", standby.machine()]);
        }
        if let Some(env_file) = &bootstrap.env_file {
            command = command.source_env(env_file.as_str());
        }

        let spinner = progress::spinner(&format!("{} on {coordinator}", bootstrap.command));
        let result = ctx.pool.run_with_timeout(
            &coordinator,
            &command,
            Some(Duration::from_secs(bootstrap.timeout_secs)),
        );
        let output = match result {
            Ok(output) => {
                progress::finish_success(&spinner, "cluster initialized");
                output
            }
            Err(e) => {
                progress::finish_error(&spinner, "cluster init failed");
                return Err(e).with_context(|| format!("{} on {coordinator}", bootstrap.command));
            }
        };
        if output.exit_code != 0 {
            ui::warn(&format!(
                "{} finished with warnings (exit status {})",
                bootstrap.command, output.exit_code
            ));
        }

        ctx.step("Recording bootstrap output");
        if output.dry_run {
            ui::dim("[dry-run] nothing to record");
            return Ok(());
        }
        let log_path = paths::artifacts_dir(ctx.state_dir()).join("bootstrap.log");
        let transcript = format!("{}{}", output.stdout, output.stderr);
        fs::write(&log_path, &transcript)
            .with_context(|| format!("Failed to write {}", log_path.display()))?;
        ui::kv("Log", &log_path.display().to_string());
        ctx.set_bootstrap_output(transcript);
        Ok(())
    }
}
