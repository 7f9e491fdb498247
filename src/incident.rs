//! Operator-facing error taxonomy and the append-only incident log.
//!
//! Every fatal error and every swallowed cleanup failure leaves one JSON
//! line in `<state_dir>/incidents.log`. Entries carry rendered commands and
//! messages only; secrets never reach this file because rendered commands
//! never include stdin or child environment.

use crate::config::ConfigInvalid;
use crate::engine::PhaseFailure;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Exit status for an operator interrupt.
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Configuration,
    Connectivity,
    RemoteCommand,
    Cleanup,
    Interrupted,
    Internal,
}

impl Category {
    /// Classify an error by the most specific typed cause in its chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        if let Some(remote) = find::<remotekit::Error>(err) {
            return match remote.category() {
                remotekit::ErrorCategory::Transport
                | remotekit::ErrorCategory::Timeout
                | remotekit::ErrorCategory::Local => Self::Connectivity,
                remotekit::ErrorCategory::RemoteCommand => Self::RemoteCommand,
                remotekit::ErrorCategory::Other => Self::Internal,
            };
        }
        if let Some(plan) = find::<clusterkit::Error>(err) {
            return match plan.category() {
                clusterkit::ErrorCategory::Configuration => Self::Configuration,
                clusterkit::ErrorCategory::Filesystem => Self::Internal,
            };
        }
        if find::<ConfigInvalid>(err).is_some() {
            return Self::Configuration;
        }
        Self::Internal
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Connectivity => "connectivity",
            Self::RemoteCommand => "remote-command",
            Self::Cleanup => "cleanup",
            Self::Interrupted => "interrupted",
            Self::Internal => "internal",
        }
    }

    pub fn advice(self) -> &'static str {
        match self {
            Self::Configuration => "Fix the config file and run `mppinstall validate`",
            Self::Connectivity => {
                "Check ssh access to the host, then rerun; completed phases are skipped"
            }
            Self::RemoteCommand => {
                "Inspect the command's stderr on the host, then rerun; completed phases are skipped"
            }
            Self::Cleanup => "Remove the leftovers by hand or rerun with --clean",
            Self::Interrupted => "Rerun to resume from the first incomplete phase",
            Self::Internal => "Rerun with -vv for details",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Find a typed cause in an error, whether attached as context or source.
pub fn find<T>(err: &anyhow::Error) -> Option<&T>
where
    T: std::error::Error + Send + Sync + 'static,
{
    err.downcast_ref::<T>()
        .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<T>()))
}

// ============================================================================
// Incident
// ============================================================================

/// One line of the incident log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub timestamp: DateTime<Utc>,
    pub category: Category,
    /// Process exit status the run ended with (0 for swallowed cleanup errors)
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub message: String,
}

impl Incident {
    fn new(category: Category, exit_code: i32, message: String) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            exit_code,
            command_exit_code: None,
            command: None,
            phase: None,
            step: None,
            host: None,
            message,
        }
    }

    /// Build an incident for an error that ended the run.
    pub fn from_error(err: &anyhow::Error, exit_code: i32) -> Self {
        let mut incident = Self::new(Category::from_error(err), exit_code, format!("{err:#}"));
        incident.fill_from(err);
        incident
    }

    /// Build an incident for a cleanup failure that was logged and swallowed.
    pub fn cleanup(err: &anyhow::Error) -> Self {
        let mut incident = Self::new(Category::Cleanup, 0, format!("{err:#}"));
        incident.fill_from(err);
        incident
    }

    pub fn interrupted(phase: Option<(&str, usize, usize)>) -> Self {
        let mut incident = Self::new(
            Category::Interrupted,
            EXIT_INTERRUPTED,
            "interrupted by operator".to_string(),
        );
        if let Some((name, step, total)) = phase {
            incident.phase = Some(name.to_string());
            incident.step = Some(format!("{step}/{total}"));
        }
        incident
    }

    fn fill_from(&mut self, err: &anyhow::Error) {
        if let Some(remote) = find::<remotekit::Error>(err) {
            self.host = remote.host().map(str::to_string);
            self.command = remote.command().map(str::to_string);
            self.command_exit_code = remote.exit_code();
        }
        if let Some(failure) = find::<PhaseFailure>(err) {
            self.phase = Some(failure.phase.clone());
            self.step = Some(format!("{}/{}", failure.step, failure.total));
        }
    }
}

// ============================================================================
// Log file
// ============================================================================

/// Append one incident as a JSON line.
pub fn append(path: &Path, incident: &Incident) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let line = serde_json::to_string(incident).context("Failed to serialize incident")?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open incident log: {}", path.display()))?;
    writeln!(file, "{line}")
        .with_context(|| format!("Failed to append to incident log: {}", path.display()))?;
    Ok(())
}

/// Append, logging instead of failing. Used on paths that are already
/// reporting another error.
pub fn record(path: &Path, incident: &Incident) {
    if let Err(e) = append(path, incident) {
        log::warn!("Could not record incident: {e:#}");
    }
}

/// Most recent parseable incident, if any.
pub fn last(path: &Path) -> Option<Incident> {
    let content = fs::read_to_string(path).ok()?;
    content
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str(line).ok())
}
