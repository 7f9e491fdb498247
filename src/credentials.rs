//! Secrets for ssh and the service account.
//!
//! Values live only in memory as [`Secret`]s; they are read from the
//! environment or prompted for, never from the config file.

use anyhow::{Context, Result};
use dialoguer::Password;
use remotekit::Secret;

/// Shared ssh password for every host
pub const ENV_PASSWORD: &str = "MPPINSTALL_PASSWORD";

/// Password to set for the service account
pub const ENV_ACCOUNT_PASSWORD: &str = "MPPINSTALL_ACCOUNT_PASSWORD";

/// Shared ssh secret: environment first, then a prompt when `ask` is set.
///
/// `None` means ssh authenticates on its own (keys or agent) and may
/// prompt per host.
pub fn ssh_secret(ask: bool) -> Result<Option<Secret>> {
    if let Some(secret) = Secret::from_env(ENV_PASSWORD) {
        log::debug!("Using ssh password from {ENV_PASSWORD}");
        return Ok(Some(secret));
    }
    if !ask {
        return Ok(None);
    }
    let value = Password::new()
        .with_prompt("SSH password for all hosts")
        .interact()
        .context("Failed to read password")?;
    Ok((!value.is_empty()).then(|| Secret::new(value)))
}

pub fn account_secret() -> Option<Secret> {
    Secret::from_env(ENV_ACCOUNT_PASSWORD)
}
