use anyhow::Result;
use remotekit::Target;

use crate::engine::{Orchestrator, Phase, SkippedExtension};
use crate::incident::{self, Category};
use crate::phases::packages;
use crate::{paths, ui};

/// Install optional companion packages.
///
/// A host that cannot be reached is skipped with a warning instead of
/// failing the run; any other error is fatal.
pub struct Extensions;

impl Phase for Extensions {
    fn name(&self) -> &'static str {
        "extensions"
    }

    fn description(&self) -> &'static str {
        "install optional packages"
    }

    fn steps(&self) -> usize {
        2
    }

    fn run(&self, ctx: &mut Orchestrator) -> Result<()> {
        let extensions = ctx.config.packages.extensions.clone();
        if extensions.is_empty() {
            ctx.step("No optional packages configured");
            return Ok(());
        }
        let targets = ctx.targets()?;
        ctx.refresh_sessions(&targets);

        ctx.step(&format!(
            "Copying {} package(s) to {} host(s)",
            extensions.len(),
            targets.len()
        ));
        let mut staged: Vec<(usize, Target, String)> = Vec::new();
        for (i, ext) in extensions.iter().enumerate() {
            let local = paths::expand(&ext.path);
            let remote = ctx.config.staged_path(&local);
            for target in &targets {
                let result = packages::stage(&ctx.pool, target, &local, &remote);
                if skip_unreachable(ctx, result, &ext.name, target)? {
                    staged.push((i, target.clone(), remote.clone()));
                }
            }
        }

        ctx.step("Installing optional packages");
        for (i, target, remote) in &staged {
            let result = packages::install(&ctx.pool, &ctx.config, target, remote);
            skip_unreachable(ctx, result, &extensions[*i].name, target)?;
        }

        let skipped = ctx.skipped_extensions().len();
        if skipped > 0 {
            ui::warn(&format!("{skipped} optional install(s) skipped"));
        }
        Ok(())
    }
}

/// `Ok(true)` on success, `Ok(false)` when the host was unreachable and
/// the package was skipped there.
fn skip_unreachable(
    ctx: &mut Orchestrator,
    result: Result<()>,
    package: &str,
    target: &Target,
) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if Category::from_error(&e) == Category::Connectivity => {
            ui::warn(&format!("{target}: skipping {package}: {e:#}"));
            incident::record(
                &paths::incident_log(ctx.state_dir()),
                &incident::Incident::from_error(&e, 0),
            );
            ctx.skip_extension(SkippedExtension {
                package: package.to_string(),
                host: target.to_string(),
                reason: format!("{e:#}"),
            });
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
