use anyhow::{Context as _, Result};
use std::path::PathBuf;

use crate::Context;
use crate::phases::init;
use crate::{paths, ui};

/// Write the bootstrap configuration without contacting any host.
pub fn run(ctx: &Context, output: Option<PathBuf>) -> Result<()> {
    let config = ctx.load_config()?;
    config.validate()?;

    let plan = clusterkit::generate(&config.topology())?;
    let dir = match output {
        Some(dir) => dir,
        None => paths::artifacts_dir(&ctx.state_dir()?),
    };
    let written = plan
        .artifact
        .write_to(&dir)
        .with_context(|| format!("Failed to write artifacts to {}", dir.display()))?;

    ui::header("Bootstrap configuration");
    if let Some(reason) = &plan.mirrors_skipped {
        ui::warn(&format!("Mirrors disabled: {reason}"));
    }
    init::print_topology(&plan);
    println!();
    ui::success(&format!("Wrote {}", written.config.display()));
    ui::success(&format!("Wrote {}", written.machine_list.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures;
    use tempfile::TempDir;

    #[test]
    fn test_generate_into_output_dir() {
        let dir = TempDir::new().unwrap();
        fixtures::write_config(dir.path());
        let out = dir.path().join("out");

        run(&fixtures::context(dir.path()), Some(out.clone())).unwrap();

        let machine_list = std::fs::read_to_string(out.join(clusterkit::artifact::MACHINE_LIST_FILE)).unwrap();
        assert_eq!(machine_list.lines().collect::<Vec<_>>(), ["sdw1", "sdw2", "sdw3"]);
        assert!(out.join(clusterkit::artifact::CONFIG_FILE).is_file());
        assert!(!dir.path().join("state").exists());
    }

    #[test]
    fn test_generate_defaults_to_state_dir() {
        let dir = TempDir::new().unwrap();
        fixtures::write_config(dir.path());

        run(&fixtures::context(dir.path()), None).unwrap();

        let artifacts = paths::artifacts_dir(&dir.path().join("state"));
        assert!(artifacts.join(clusterkit::artifact::CONFIG_FILE).is_file());
    }

    #[test]
    fn test_generate_without_config_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let err = run(&fixtures::context(dir.path()), None).unwrap_err();
        assert!(err.downcast_ref::<crate::config::ConfigInvalid>().is_some());
    }
}
