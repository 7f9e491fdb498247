//! Error types for remote execution.
//!
//! Errors are categorized so that the retry helper can tell a transport
//! failure (the command never reached the host) apart from a remote command
//! that ran and exited non-zero. Timeouts get their own category so callers
//! can report them distinctly; an expired command may still be running on the
//! host, so they are not retried unless the policy asks for it.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Categories of remote execution errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection refused, host unreachable, authentication rejected
    Transport,
    /// Connect or command deadline expired
    Timeout,
    /// The command ran on the host and exited with an unaccepted status
    RemoteCommand,
    /// A local helper (`ssh`, `scp`, `sshpass`) could not be started
    Local,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Transport => "Host unreachable",
            Self::Timeout => "Operation timed out",
            Self::RemoteCommand => "Remote command failed",
            Self::Local => "Local tool unavailable",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Transport => "Check that the host is up, sshd is running and credentials are valid",
            Self::Timeout => "Check network latency or raise the ssh timeouts in the config",
            Self::RemoteCommand => "Inspect the command's stderr on the host and fix the cause",
            Self::Local => "Install openssh-clients (and sshpass when using a shared password)",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while talking to remote hosts.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport failed before the command could run
    #[error("cannot reach {host}: {message}")]
    Transport {
        /// Host the connection was aimed at
        host: String,
        /// Diagnostic output from the transport
        message: String,
    },

    /// A connect or command deadline expired
    #[error("{operation} on {host} timed out after {}s", timeout.as_secs())]
    Timeout {
        /// Host the operation targeted
        host: String,
        /// Rendered operation (never includes secrets)
        operation: String,
        /// The deadline that expired
        timeout: Duration,
    },

    /// The remote command ran and exited with an unaccepted status
    #[error("`{command}` on {host} exited with status {exit_code}")]
    CommandFailed {
        /// Host the command ran on
        host: String,
        /// Rendered command (never includes secrets)
        command: String,
        /// Exit status reported by the remote shell
        exit_code: i32,
        /// Standard error captured from the command
        stderr: String,
    },

    /// A local helper process could not be started
    #[error("failed to start {program}: {message}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Reason reported by the OS
        message: String,
    },

    /// A local file that should be copied does not exist
    #[error("local file not found: {0}")]
    LocalFileNotFound(PathBuf),

    /// IO error on a local path
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path involved in the error
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Transport { .. } => ErrorCategory::Transport,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::CommandFailed { .. } => ErrorCategory::RemoteCommand,
            Error::Spawn { .. } | Error::LocalFileNotFound(_) | Error::Io { .. } => {
                ErrorCategory::Local
            }
            Error::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Host the error is attributed to, if any.
    pub fn host(&self) -> Option<&str> {
        match self {
            Error::Transport { host, .. }
            | Error::Timeout { host, .. }
            | Error::CommandFailed { host, .. } => Some(host),
            _ => None,
        }
    }

    /// Exit status of the failing command, if it ran.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::CommandFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    /// Rendered command or operation that failed, if known.
    pub fn command(&self) -> Option<&str> {
        match self {
            Error::CommandFailed { command, .. } => Some(command),
            Error::Timeout { operation, .. } => Some(operation),
            _ => None,
        }
    }
}

/// Result type for remote operations.
pub type Result<T> = std::result::Result<T, Error>;
