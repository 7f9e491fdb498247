//! Cluster installation config (`cluster.toml`).
//!
//! Required fields are enforced by serde; everything else has a default.
//! Secrets are never part of this file: they come from the environment or
//! an interactive prompt.

use anyhow::{Context, Result};
use clusterkit::{ClusterSettings, Directories, Host, Topology};
use remotekit::{RetryPolicy, SshOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// A configuration problem. Always fatal, always raised before any host is
/// contacted.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConfigInvalid(pub String);

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub cluster: ClusterSection,

    #[serde(default)]
    pub directories: Directories,

    #[serde(default)]
    pub account: AccountSection,

    #[serde(default)]
    pub ssh: SshSection,

    #[serde(default)]
    pub retry: RetrySection,

    pub packages: PackagesSection,

    #[serde(default)]
    pub bootstrap: BootstrapSection,

    #[serde(default)]
    pub preflight: PreflightSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSection {
    pub coordinator: Host,
    pub segments: Vec<Host>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standby: Option<Host>,
    #[serde(flatten)]
    pub settings: ClusterSettings,
}

/// Service account that owns the database processes and data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountSection {
    pub user: String,
    pub group: String,
    /// Defaults to `/home/<user>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    pub shell: String,
}

impl Default for AccountSection {
    fn default() -> Self {
        Self {
            user: "gpadmin".to_string(),
            group: "gpadmin".to_string(),
            home: None,
            shell: "/bin/bash".to_string(),
        }
    }
}

impl AccountSection {
    pub fn home_dir(&self) -> String {
        self.home
            .clone()
            .unwrap_or_else(|| format!("/home/{}", self.user))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSection {
    pub user: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_dir: Option<String>,
    pub control_persist_secs: u64,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub strict_host_key_checking: String,
    /// Run remote commands through `sudo -n`
    pub sudo: bool,
}

impl Default for SshSection {
    fn default() -> Self {
        let defaults = SshOptions::default();
        Self {
            user: defaults.user,
            port: defaults.port,
            control_dir: None,
            control_persist_secs: defaults.control_persist.as_secs(),
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            command_timeout_secs: defaults.command_timeout.as_secs(),
            strict_host_key_checking: defaults.strict_host_key_checking,
            sudo: defaults.elevate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub delay_secs: u64,
    pub backoff_factor: f64,
    pub max_delay_secs: u64,
    pub retry_command_failures: bool,
    pub retry_timeouts: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            max_attempts: defaults.max_attempts,
            delay_secs: defaults.delay.as_secs(),
            backoff_factor: defaults.backoff_factor,
            max_delay_secs: defaults.max_delay.as_secs(),
            retry_command_failures: defaults.retry_command_failures,
            retry_timeouts: defaults.retry_timeouts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagesSection {
    /// Local path of the database server package
    pub server: String,

    /// Package name used for removal during `--clean`
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Where the server package installs itself on each host
    #[serde(default = "default_install_root")]
    pub install_root: String,

    /// Installer invocation; the package path is appended
    #[serde(default = "default_install_command")]
    pub install_command: Vec<String>,

    /// Removal invocation; the package name is appended
    #[serde(default = "default_remove_command")]
    pub remove_command: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<ExtensionPackage>,
}

fn default_server_name() -> String {
    "mppdb".to_string()
}

fn default_install_root() -> String {
    "/usr/local/mppdb".to_string()
}

fn default_install_command() -> Vec<String> {
    ["rpm", "-Uvh", "--replacepkgs"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_remove_command() -> Vec<String> {
    vec!["rpm".to_string(), "-e".to_string()]
}

/// Optional companion package installed by the `extensions` phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionPackage {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapSection {
    /// Cluster init executable, run as the service account on the coordinator
    pub command: String,
    pub args: Vec<String>,
    /// Shell file sourced before running database tools
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_file: Option<String>,
    pub timeout_secs: u64,
    /// Exit codes that count as success (cluster init exits 1 on warnings)
    pub accept_exit_codes: Vec<i32>,
    /// Command that stops the cluster during `--clean`
    pub stop_command: Vec<String>,
}

impl Default for BootstrapSection {
    fn default() -> Self {
        Self {
            command: "gpinitsystem".to_string(),
            args: vec!["-a".to_string()],
            env_file: None,
            timeout_secs: 3600,
            accept_exit_codes: vec![0, 1],
            stop_command: vec!["gpstop".to_string(), "-a".to_string(), "-M".to_string(), "immediate".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightSection {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<PreflightCheck>,
}

/// A pass/fail compatibility predicate run on every host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightCheck {
    pub name: String,
    pub command: Vec<String>,
}

// ============================================================================
// Loading and validation
// ============================================================================

impl Config {
    /// Load and parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigInvalid(format!("Could not read config {}: {e}", path.display()))
        })?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigInvalid(e.to_string()).into())
    }

    /// Write the config back in canonical form.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Check every field that is not enforced by the schema itself.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> anyhow::Error { ConfigInvalid(msg).into() };

        clusterkit::generate(&self.topology()).map_err(|e| invalid(e.to_string()))?;

        clusterkit::validate::identifier("account user", &self.account.user)
            .and_then(|()| clusterkit::validate::identifier("account group", &self.account.group))
            .and_then(|()| clusterkit::validate::path("account home", &self.account.home_dir()))
            .and_then(|()| clusterkit::validate::path("account shell", &self.account.shell))
            .and_then(|()| clusterkit::validate::path("install root", &self.packages.install_root))
            .map_err(|e| invalid(e.to_string()))?;
        if let Some(env_file) = &self.bootstrap.env_file {
            clusterkit::validate::path("bootstrap env file", env_file)
                .map_err(|e| invalid(e.to_string()))?;
        }

        if self.ssh.user.trim().is_empty() {
            return Err(invalid("ssh.user must not be empty".to_string()));
        }
        if self.ssh.port == 0 {
            return Err(invalid("ssh.port must be 1-65535".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1".to_string()));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(invalid("retry.backoff_factor must be >= 1.0".to_string()));
        }
        if self.packages.server.trim().is_empty() {
            return Err(invalid("packages.server must not be empty".to_string()));
        }
        for (field, argv) in [
            ("packages.install_command", &self.packages.install_command),
            ("packages.remove_command", &self.packages.remove_command),
        ] {
            if argv.is_empty() {
                return Err(invalid(format!("{field} must not be empty")));
            }
        }
        if self.bootstrap.command.trim().is_empty() {
            return Err(invalid("bootstrap.command must not be empty".to_string()));
        }

        let mut names = std::collections::BTreeSet::new();
        for ext in &self.packages.extensions {
            if ext.name.trim().is_empty() || ext.path.trim().is_empty() {
                return Err(invalid("extension packages need a name and a path".to_string()));
            }
            if !names.insert(ext.name.as_str()) {
                return Err(invalid(format!("duplicate extension package '{}'", ext.name)));
            }
        }
        for check in &self.preflight.checks {
            if check.command.is_empty() {
                return Err(invalid(format!(
                    "preflight check '{}' has an empty command",
                    check.name
                )));
            }
        }

        Ok(())
    }

    /// blake3 hash of the canonical serialization.
    pub fn fingerprint(&self) -> String {
        let canonical = toml::to_string(self).unwrap_or_default();
        blake3::hash(canonical.as_bytes()).to_hex().to_string()
    }

    // ========================================================================
    // Conversions
    // ========================================================================

    pub fn topology(&self) -> Topology {
        let mut topology = Topology::new(
            self.cluster.coordinator.clone(),
            self.cluster.segments.clone(),
        )
        .with_directories(self.directories.clone())
        .with_settings(self.cluster.settings.clone());
        topology.standby = self.cluster.standby.clone();
        topology
    }

    pub fn ssh_options(&self) -> SshOptions {
        let defaults = SshOptions::default();
        SshOptions {
            user: self.ssh.user.clone(),
            port: self.ssh.port,
            control_dir: self
                .ssh
                .control_dir
                .as_deref()
                .map_or(defaults.control_dir, crate::paths::expand),
            control_persist: Duration::from_secs(self.ssh.control_persist_secs),
            connect_timeout: Duration::from_secs(self.ssh.connect_timeout_secs),
            command_timeout: Duration::from_secs(self.ssh.command_timeout_secs),
            strict_host_key_checking: self.ssh.strict_host_key_checking.clone(),
            elevate: self.ssh.sudo,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            delay: Duration::from_secs(self.retry.delay_secs),
            backoff_factor: self.retry.backoff_factor,
            max_delay: Duration::from_secs(self.retry.max_delay_secs),
            retry_command_failures: self.retry.retry_command_failures,
            retry_timeouts: self.retry.retry_timeouts,
        }
    }

    /// Local path of the server package.
    pub fn server_package(&self) -> PathBuf {
        crate::paths::expand(&self.packages.server)
    }

    /// Remote staging path for a local package file.
    pub fn staged_path(&self, local: &Path) -> String {
        let name = local
            .file_name()
            .map_or_else(|| "package".to_string(), |n| n.to_string_lossy().to_string());
        format!(
            "{}/{name}",
            self.cluster.settings.work_dir.trim_end_matches('/')
        )
    }
}

/// Starter config written by `mppinstall validate --init`.
pub const EXAMPLE: &str = r#"[cluster]
coordinator = "mdw"
segments = ["sdw1", "sdw2", "sdw3"]
database_name = "mppdb"

[directories]
coordinator = "/data/coordinator"
segment = "/data/primary"
mirror = "/data/mirror"

[account]
user = "gpadmin"
group = "gpadmin"

[ssh]
user = "root"

[packages]
server = "~/packages/mppdb-server.rpm"

[bootstrap]
env_file = "/usr/local/mppdb/cluster_path.sh"
"#;

// ============================================================================
// Tests
// ============================================================================
