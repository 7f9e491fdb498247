use anyhow::Result;
use std::fs;
use std::path::Path;

use crate::Context;
use crate::cli::InstallArgs;
use crate::engine::{self, Orchestrator, RunMode, RunSummary};
use crate::incident::{self, Incident};
use crate::interrupt::{self, CleanupRegistry};
use crate::{credentials, paths, ui};

pub fn mode(args: &InstallArgs) -> RunMode {
    if args.clean {
        RunMode::Clean
    } else if args.force {
        RunMode::ForceReset
    } else if args.extensions_only {
        RunMode::ExtensionsOnly
    } else {
        RunMode::Normal
    }
}

pub fn run(ctx: &Context, args: &InstallArgs) -> Result<()> {
    let config_path = ctx.config_path()?;
    let config = ctx.load_config()?;
    let state_dir = ctx.state_dir()?;
    let mode = mode(args);

    ui::header(match mode {
        RunMode::Clean => "mppinstall clean",
        RunMode::ExtensionsOnly => "mppinstall install (extensions only)",
        RunMode::ForceReset => "mppinstall install (from scratch)",
        RunMode::Normal => "mppinstall install",
    });
    ui::kv("Config", &config_path.display().to_string());
    ui::kv("State", &state_dir.display().to_string());
    ui::kv("Coordinator", &config.cluster.coordinator.to_string());
    ui::kv("Segments", &config.cluster.segments.len().to_string());
    if args.dry_run {
        ui::dry_run_notice();
    }

    let destructive = matches!(mode, RunMode::Clean | RunMode::ForceReset);
    if destructive && !args.dry_run && !args.yes {
        let prompt = match mode {
            RunMode::Clean => "Remove the cluster and its data from every host?",
            _ => "Reinstall from scratch, wiping existing data directories?",
        };
        if !super::confirm(prompt)? {
            ui::info("Cancelled");
            return Ok(());
        }
    }

    let secret = credentials::ssh_secret(args.ask_password)?;
    let pool = super::session_pool(&config, args.dry_run, secret);
    let mut orchestrator = Orchestrator::new(config, pool, &state_dir)
        .with_account_secret(credentials::account_secret());

    interrupt::install(cleanup_registry(&orchestrator, &state_dir))?;

    let summary = engine::run(&mut orchestrator, mode)?;
    report(&summary, mode);
    Ok(())
}

/// Interrupt cleanup: record the incident, drop temp files, close sessions.
fn cleanup_registry(orchestrator: &Orchestrator, state_dir: &Path) -> CleanupRegistry {
    let registry = CleanupRegistry::new();

    let sessions = orchestrator.pool.teardown_handle();
    registry.register("close sessions", move || {
        let closed = sessions.close_all();
        log::debug!("closed {closed} session(s)");
    });

    let marker_dir = orchestrator.markers.dir().to_path_buf();
    registry.register("remove temporary files", move || {
        remove_temp_files(&marker_dir);
    });

    let cursor = orchestrator.cursor_handle();
    let log_path = paths::incident_log(state_dir);
    registry.register("record incident", move || {
        incident::record(&log_path, &Incident::interrupted(engine::position(&cursor)));
    });

    registry
}

/// Remove half-written marker files.
fn remove_temp_files(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "tmp"))
        .filter(|path| fs::remove_file(path).is_ok())
        .count()
}

fn report(summary: &RunSummary, mode: RunMode) {
    if mode == RunMode::Clean {
        return;
    }
    println!();
    if summary.executed.is_empty() {
        ui::success("Nothing to do; every phase already completed");
        ui::dim("Use --force to run all phases again");
        return;
    }
    ui::success(&format!(
        "Ran {} phase(s), skipped {}",
        summary.executed.len(),
        summary.skipped.len()
    ));
}
