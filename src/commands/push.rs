use anyhow::{Context as _, Result, bail};
use rayon::prelude::*;
use remotekit::{SessionPool, Target};
use std::path::Path;
use std::sync::Mutex;

use crate::Context;
use crate::cli::PushArgs;
use crate::config::Config;
use crate::engine;
use crate::phases::packages;
use crate::{credentials, progress, ui};

pub fn run(ctx: &Context, args: &PushArgs) -> Result<()> {
    let config = ctx.load_config()?;
    config.validate()?;
    if !args.local.is_file() {
        bail!("local file not found: {}", args.local.display());
    }

    let plan = clusterkit::generate(&config.topology())?;
    let targets: Vec<Target> = plan.hosts.iter().map(|a| engine::target(&a.host)).collect();

    ui::header("mppinstall push");
    ui::kv("File", &args.local.display().to_string());
    ui::kv("Destination", &args.remote);
    ui::kv("Hosts", &targets.len().to_string());
    if args.dry_run {
        ui::dry_run_notice();
    }

    let secret = credentials::ssh_secret(args.ask_password)?;
    let pool = super::session_pool(&config, args.dry_run, secret);
    let jobs = if args.parallel { args.jobs.max(1) } else { 1 };

    let failures = push_all(&pool, &config, &targets, &args.local, &args.remote, args.install, jobs)?;

    println!();
    if failures.is_empty() {
        ui::success(&format!("Pushed to {} host(s)", targets.len()));
        return Ok(());
    }
    for (host, e) in &failures {
        ui::error(&format!("{host}: {e:#}"));
    }
    bail!("push failed on {} of {} host(s)", failures.len(), targets.len())
}

/// Copy (and optionally install) a file on every target, `jobs` hosts at a
/// time. Returns the per-host failures; an empty list means every host
/// succeeded.
pub fn push_all(
    pool: &SessionPool,
    config: &Config,
    targets: &[Target],
    local: &Path,
    remote: &str,
    install: bool,
    jobs: usize,
) -> Result<Vec<(String, anyhow::Error)>> {
    let pb = progress::bar(targets.len() as u64, "Pushing");
    let failures: Mutex<Vec<(String, anyhow::Error)>> = Mutex::new(Vec::new());

    let push_one = |target: &Target| {
        pb.set_message(target.to_string());
        let result = packages::stage(pool, target, local, remote).and_then(|()| {
            if install {
                packages::install(pool, config, target, remote)
            } else {
                Ok(())
            }
        });
        if let Err(e) = result {
            log::debug!("push to {target} failed: {e:#}");
            match failures.lock() {
                Ok(mut guard) => guard.push((target.to_string(), e)),
                Err(poisoned) => poisoned.into_inner().push((target.to_string(), e)),
            }
        }
        pb.inc(1);
    };

    if jobs <= 1 {
        targets.iter().for_each(push_one);
    } else {
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .context("Failed to create push thread pool")?;
        workers.install(|| targets.par_iter().for_each(push_one));
    }

    let failures = match failures.into_inner() {
        Ok(failures) => failures,
        Err(poisoned) => poisoned.into_inner(),
    };
    if failures.is_empty() {
        progress::finish_success(&pb, "done");
    } else {
        progress::finish_error(&pb, &format!("{} failed", failures.len()));
    }
    Ok(failures)
}
