use anyhow::{Context, Result, bail};
use remotekit::{RemoteCommand, Target};
use std::path::Path;

use crate::config::Config;
use crate::engine::{Orchestrator, Phase};
use crate::progress;

/// Copy and install the database server package on every host.
pub struct Packages;

impl Phase for Packages {
    fn name(&self) -> &'static str {
        "packages"
    }

    fn description(&self) -> &'static str {
        "install the database server package"
    }

    fn steps(&self) -> usize {
        3
    }

    fn run(&self, ctx: &mut Orchestrator) -> Result<()> {
        let targets = ctx.targets()?;
        let local = ctx.config.server_package();
        let staged = ctx.config.staged_path(&local);
        ctx.refresh_sessions(&targets);

        ctx.step(&format!("Copying server package to {} host(s)", targets.len()));
        let pb = progress::bar(targets.len() as u64, "copy");
        for target in &targets {
            pb.set_message(target.to_string());
            stage(&ctx.pool, target, &local, &staged)?;
            pb.inc(1);
        }
        progress::finish_clear(&pb);

        ctx.step("Installing server package");
        for target in &targets {
            install(&ctx.pool, &ctx.config, target, &staged)?;
        }

        let install_root = &ctx.config.packages.install_root;
        ctx.step(&format!("Handing {install_root} to {}", ctx.config.account.user));
        let owner = format!("{}:{}", ctx.config.account.user, ctx.config.account.group);
        for target in &targets {
            ctx.pool
                .run(
                    target,
                    &RemoteCommand::new("chown").args(["-R", owner.as_str(), install_root.as_str()]),
                )
                .with_context(|| format!("setting ownership of {install_root} on {target}"))?;
        }
        Ok(())
    }
}

/// Create the parent directory of `remote` and copy a package there.
pub fn stage(
    pool: &remotekit::SessionPool,
    target: &Target,
    local: &Path,
    remote: &str,
) -> Result<()> {
    let parent = Path::new(remote)
        .parent()
        .and_then(Path::to_str)
        .filter(|p| !p.is_empty());
    // bare names land in the login directory, which always exists
    if let Some(dir) = parent {
        pool.run(target, &RemoteCommand::new("mkdir").args(["-p", dir]))
            .with_context(|| format!("creating {dir} on {target}"))?;
    }
    pool.copy(target, local, remote)
        .with_context(|| format!("copying {} to {target}", local.display()))?;
    Ok(())
}

/// Install a staged package with the configured installer.
pub fn install(
    pool: &remotekit::SessionPool,
    config: &Config,
    target: &Target,
    remote: &str,
) -> Result<()> {
    let Some((program, args)) = config.packages.install_command.split_first() else {
        bail!("packages.install_command is empty");
    };
    let command = RemoteCommand::new(program.as_str())
        .args(args.iter().map(String::as_str))
        .arg(remote);
    pool.run(target, &command)
        .with_context(|| format!("installing {remote} on {target}"))?;
    Ok(())
}
