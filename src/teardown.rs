//! Best-effort cluster removal for `install --clean`.
//!
//! Every operation is attempted on every host. Failures are reported,
//! recorded as cleanup incidents and counted; they never abort the run.

use anyhow::{Context, Result};
use remotekit::RemoteCommand;

use crate::bootstrap;
use crate::engine::{Orchestrator, target};
use crate::incident::{self, Incident};
use crate::{paths, ui};

/// Tear the cluster down. Returns the number of swallowed failures.
pub fn clean(ctx: &mut Orchestrator) -> Result<usize> {
    let plan = clusterkit::generate(&ctx.config.topology())
        .context("Failed to compute the cluster layout to clean")?;
    let log_path = paths::incident_log(ctx.state_dir());
    let account = ctx.config.account.clone();
    let packages = ctx.config.packages.clone();
    let bootstrap_cfg = ctx.config.bootstrap.clone();
    let work_dir = ctx.config.cluster.settings.work_dir.clone();
    let pool = &ctx.pool;

    let mut failures = 0usize;
    let mut note = |result: Result<()>| {
        if let Err(e) = result {
            failures += 1;
            ui::warn(&format!("{e:#}"));
            incident::record(&log_path, &Incident::cleanup(&e));
        }
    };

    ui::header("Removing cluster");

    // Stop the database first so its processes release shared memory
    let coordinator = target(plan.coordinator());
    if let Some((program, args)) = bootstrap_cfg.stop_command.split_first() {
        ui::info(&format!("Stopping cluster on {coordinator}"));
        pool.connect(&coordinator);
        let mut stop = RemoteCommand::new(program.as_str())
            .args(args.iter().map(String::as_str))
            .run_as(account.user.as_str());
        if let Some(env_file) = &bootstrap_cfg.env_file {
            stop = stop.source_env(env_file.as_str());
        }
        note(
            pool.run(&coordinator, &stop)
                .map(|_| ())
                .with_context(|| format!("stopping the cluster on {coordinator}")),
        );
    }

    let mut package_names = vec![packages.server_name.clone()];
    package_names.extend(packages.extensions.iter().map(|e| e.name.clone()));

    for assignment in &plan.hosts {
        let host = target(&assignment.host);
        ui::info(&format!("Cleaning {host}"));
        pool.connect(&host);

        note(bootstrap::kill_processes(pool, &host, &account.user));
        note(bootstrap::remove_shared_memory(pool, &host, &account.user).map(|_| ()));
        note(bootstrap::remove_socket_locks(pool, &host, &account.user));
        note(bootstrap::remove_directories(pool, &host, &assignment.directories));
        note(bootstrap::remove_directories(pool, &host, std::slice::from_ref(&work_dir)));

        for name in &package_names {
            let (program, args) = match packages.remove_command.split_first() {
                Some(split) => split,
                None => break,
            };
            // Exit 1 from the package manager means "not installed"
            let remove = RemoteCommand::new(program.as_str())
                .args(args.iter().map(String::as_str))
                .arg(name.as_str())
                .accept_exit_codes(&[0, 1]);
            note(
                pool.run(&host, &remove)
                    .map(|_| ())
                    .with_context(|| format!("removing package {name} on {host}")),
            );
        }
    }

    if failures == 0 {
        ui::success(&format!("Cleaned {} host(s)", plan.hosts.len()));
    } else {
        ui::warn(&format!(
            "Cleaned {} host(s) with {failures} problem(s); see {}",
            plan.hosts.len(),
            log_path.display()
        ));
    }
    ui::dim("Phase markers were kept; use `mppinstall install --force` to reinstall");
    Ok(failures)
}
