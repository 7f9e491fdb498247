//! Centralized path resolution for mppinstall
//!
//! # Environment Variables
//!
//! - `MPPINSTALL_CONFIG_DIR` - Override config directory
//! - `MPPINSTALL_STATE_DIR` - Override state directory
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `MPPINSTALL_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/mppinstall` (if set)
//! 3. `~/.config/mppinstall`
//!
//! For state_dir():
//! 1. `MPPINSTALL_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/mppinstall` (if set)
//! 3. `~/.local/state/mppinstall`
//!
//! Command-line flags take precedence over all of the above and are applied
//! by the caller.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const APP: &str = "mppinstall";

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "MPPINSTALL_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "MPPINSTALL_STATE_DIR";

/// Default config file name inside the config directory
pub const CONFIG_FILE: &str = "cluster.toml";

/// Get the mppinstall config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!("Using config dir from {ENV_CONFIG_DIR}: {}", path.display());
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join(APP);
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the mppinstall state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {ENV_STATE_DIR}: {}", path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join(APP);
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Resolve the config file: explicit flag, else `<config_dir>/cluster.toml`.
pub fn config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(expand(&path.to_string_lossy())),
        None => Ok(config_dir()?.join(CONFIG_FILE)),
    }
}

/// Resolve the state directory: explicit flag, else [`state_dir`].
pub fn resolve_state_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(expand(&path.to_string_lossy())),
        None => state_dir(),
    }
}

/// Directory holding generated bootstrap artifacts.
pub fn artifacts_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("artifacts")
}

/// Append-only incident log.
pub fn incident_log(state_dir: &Path) -> PathBuf {
    state_dir.join("incidents.log")
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Helper to run a test with temporary env var
    ///
    /// # Safety
    /// Uses unsafe env::set_var/remove_var. Only use in tests that do not
    /// read the same variables concurrently.
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: Tests run in isolation and don't read env vars concurrently
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: Tests run in isolation
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    fn without_env_var<F, R>(key: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: Tests run in isolation and don't read env vars concurrently
        unsafe { env::remove_var(key) };
        let result = f();
        if let Some(v) = original {
            // SAFETY: Tests run in isolation
            unsafe { env::set_var(key, v) };
        }
        result
    }

    #[test]
    fn test_config_dir_env_override() {
        with_env_var(ENV_CONFIG_DIR, "/custom/config/path", || {
            assert_eq!(config_dir().unwrap(), PathBuf::from("/custom/config/path"));
        });
    }

    #[test]
    fn test_config_dir_env_override_with_tilde() {
        let home = dirs::home_dir().unwrap();
        with_env_var(ENV_CONFIG_DIR, "~/clusters/prod", || {
            assert_eq!(config_dir().unwrap(), home.join("clusters").join("prod"));
        });
    }

    #[test]
    fn test_state_dir_env_override() {
        with_env_var(ENV_STATE_DIR, "/custom/state/path", || {
            assert_eq!(state_dir().unwrap(), PathBuf::from("/custom/state/path"));
        });
    }

    #[test]
    fn test_xdg_state_home() {
        without_env_var(ENV_STATE_DIR, || {
            with_env_var("XDG_STATE_HOME", "/tmp/xdg-state-test", || {
                assert_eq!(
                    state_dir().unwrap(),
                    PathBuf::from("/tmp/xdg-state-test/mppinstall")
                );
            });
        });
    }

    #[test]
    fn test_explicit_paths_win() {
        assert_eq!(
            config_file(Some(Path::new("/etc/mpp/cluster.toml"))).unwrap(),
            PathBuf::from("/etc/mpp/cluster.toml")
        );
        assert_eq!(
            resolve_state_dir(Some(Path::new("/var/lib/mpp"))).unwrap(),
            PathBuf::from("/var/lib/mpp")
        );
    }

    #[test]
    fn test_state_layout() {
        let state = Path::new("/var/lib/mpp");
        assert_eq!(artifacts_dir(state), PathBuf::from("/var/lib/mpp/artifacts"));
        assert_eq!(incident_log(state), PathBuf::from("/var/lib/mpp/incidents.log"));
    }

    #[test]
    fn test_expand_absolute() {
        assert_eq!(expand("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_VAR_12345/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_VAR_12345/file"));
    }

    #[cfg(unix)]
    #[test]
    fn test_default_state_dir_unix() {
        without_env_var(ENV_STATE_DIR, || {
            without_env_var("XDG_STATE_HOME", || {
                let home = dirs::home_dir().unwrap();
                assert_eq!(
                    state_dir().unwrap(),
                    home.join(".local").join("state").join("mppinstall")
                );
            });
        });
    }
}
