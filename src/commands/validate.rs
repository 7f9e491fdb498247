use anyhow::{Context as _, Result};
use std::fs;
use std::path::Path;

use crate::Context;
use crate::config::{Config, EXAMPLE};
use crate::ui;

pub fn run(ctx: &Context, init: bool) -> Result<()> {
    let path = ctx.config_path()?;
    if init {
        return write_example(&path);
    }

    let config = ctx.load_config()?;
    config.validate()?;
    summarize(&path, &config);
    Ok(())
}

/// Write the starter config unless a file is already there.
fn write_example(path: &Path) -> Result<()> {
    if path.exists() {
        ui::info(&format!("Config already exists: {}", path.display()));
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, EXAMPLE)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    ui::success(&format!("Wrote starter config to {}", path.display()));
    ui::dim("Edit the hosts and package paths, then run: mppinstall validate");
    Ok(())
}

fn summarize(path: &Path, config: &Config) {
    ui::header("Configuration");
    ui::kv("File", &path.display().to_string());
    ui::kv("Coordinator", &config.cluster.coordinator.to_string());
    if let Some(standby) = &config.cluster.standby {
        ui::kv("Standby", &standby.to_string());
    }
    ui::kv("Segments", &config.cluster.segments.len().to_string());
    ui::kv("Account", &config.account.user);
    ui::kv("Server package", &config.packages.server);
    ui::kv("Extensions", &config.packages.extensions.len().to_string());
    ui::kv("Fingerprint", &config.fingerprint()[..16]);
    println!();
    ui::success("Configuration is valid");
}
