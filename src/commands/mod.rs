pub mod generate;
pub mod install;
pub mod push;
pub mod status;
pub mod sweep;
pub mod validate;

use anyhow::{Context as _, Result, bail};
use dialoguer::Confirm;
use remotekit::{OpenSsh, Secret, SessionPool, Transport};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use crate::Context;
use crate::config::{Config, ConfigInvalid};
use crate::paths;

impl Context {
    pub fn config_path(&self) -> Result<PathBuf> {
        paths::config_file(self.config.as_deref())
    }

    pub fn state_dir(&self) -> Result<PathBuf> {
        paths::resolve_state_dir(self.state_dir.as_deref())
    }

    /// Load the config file, failing with a configuration error when it is
    /// missing or malformed.
    pub fn load_config(&self) -> Result<Config> {
        let path = self.config_path()?;
        if !path.is_file() {
            return Err(ConfigInvalid(format!(
                "config file not found: {} (create one with `mppinstall validate --init`)",
                path.display()
            ))
            .into());
        }
        Config::load(&path)
    }
}

/// Session pool over real ssh for a loaded config.
pub fn session_pool(config: &Config, dry_run: bool, secret: Option<Secret>) -> SessionPool {
    let transport: Arc<dyn Transport> = Arc::new(OpenSsh::new());
    SessionPool::new(transport, config.ssh_options())
        .with_secret(secret)
        .with_dry_run(dry_run)
        .with_retry(config.retry_policy())
}

/// Ask before a destructive operation. Non-interactive sessions must pass
/// `--yes`.
pub fn confirm(prompt: &str) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        bail!("refusing to continue without confirmation; pass --yes to proceed non-interactively");
    }
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}
