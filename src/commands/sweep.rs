use anyhow::{Context as _, Result, bail};
use remotekit::{OpenSsh, SshOptions};

use crate::Context;
use crate::ui;

/// Close control sockets left behind by an earlier run.
pub fn run(ctx: &Context) -> Result<()> {
    let control_dir = match ctx.load_config() {
        Ok(config) => config.ssh_options().control_dir,
        Err(e) => {
            log::debug!("No usable config ({e:#}); sweeping the default control directory");
            SshOptions::default().control_dir
        }
    };

    ui::info(&format!("Sweeping {}", control_dir.display()));
    let report = remotekit::sweep(&control_dir, &OpenSsh::new())
        .with_context(|| format!("Failed to sweep {}", control_dir.display()))?;

    for socket in &report.closed {
        ui::dim(&format!("closed {}", socket.display()));
    }
    for socket in &report.failed {
        ui::warn(&format!("could not remove {}", socket.display()));
    }

    if !report.is_clean() {
        bail!("{} control socket(s) could not be removed", report.failed.len());
    }
    if report.closed.is_empty() {
        ui::success("No stale control sockets");
    } else {
        ui::success(&format!("Closed {} control socket(s)", report.closed.len()));
    }
    Ok(())
}
