//! Error types for topology planning.
//!
//! Every planning error is a configuration error: it is raised before any
//! host is contacted. Artifact writes are the only filesystem errors.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for topology operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of topology errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The topology or cluster settings are invalid
    Configuration,
    /// Writing the generated artifact failed
    Filesystem,
}

impl ErrorCategory {
    /// Topology errors never go away on their own.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Get a user-friendly description of this error category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Configuration => "Invalid cluster configuration",
            Self::Filesystem => "Cannot write generated files",
        }
    }

    /// Get actionable advice for resolving this error category.
    #[must_use]
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Configuration => "Fix the [cluster] and [directories] sections and run `mppinstall validate`",
            Self::Filesystem => "Check permissions and free space in the state directory",
        }
    }
}

/// Errors raised while planning a cluster.
#[derive(Debug, Error)]
pub enum Error {
    /// No segment hosts were configured
    #[error("segment host list is empty")]
    EmptySegments,

    /// A host entry could not be parsed
    #[error("invalid host '{input}': {reason}")]
    InvalidHost { input: String, reason: String },

    /// One machine was listed with two different explicit ports
    #[error("host {address} listed with conflicting ports {first} and {second}")]
    PortConflict {
        address: String,
        first: u16,
        second: u16,
    },

    /// A directory path failed syntax validation
    #[error("invalid {field} path '{path}': {reason}")]
    InvalidPath {
        field: String,
        path: String,
        reason: String,
    },

    /// A name used verbatim by the bootstrap tool is malformed
    #[error("invalid {field} '{value}': {reason}")]
    InvalidSetting {
        field: String,
        value: String,
        reason: String,
    },

    /// Writing an artifact file failed
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Get the error category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io { .. } => ErrorCategory::Filesystem,
            _ => ErrorCategory::Configuration,
        }
    }

    pub(crate) fn path(field: &str, path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            field: field.to_string(),
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn setting(field: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
