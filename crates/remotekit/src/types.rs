//! Core types for remote execution.

use crate::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A host the pool can talk to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target {
    /// Address or resolvable name
    pub host: String,
    /// Explicit ssh port, overriding [`SshOptions::port`]
    pub port: Option<u16>,
}

impl Target {
    /// Create a target on the default port.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
        }
    }

    /// Set an explicit port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}

/// Identity of a session: one control socket per (host, port, user).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// An in-memory secret.
///
/// Deliberately not `Serialize`; `Debug` and `Display` are redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read a secret from an environment variable, ignoring empty values.
    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var)
            .ok()
            .filter(|v| !v.is_empty())
            .map(Self)
    }

    /// Access the raw value. Only transports should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Set when the command was intercepted by dry-run mode
    pub dry_run: bool,
}

impl Output {
    /// Synthetic success returned for intercepted mutating operations.
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }

    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Retry behaviour for remote calls.
///
/// Transport failures are retried. Timeouts and remote command failures are
/// propagated immediately unless `retry_timeouts` or `retry_command_failures`
/// is set.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (1 = no retry)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub delay: Duration,
    /// Multiplier applied to the delay per attempt (1.0 = fixed delay)
    pub backoff_factor: f64,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Also retry commands that ran and exited non-zero
    pub retry_command_failures: bool,
    /// Also retry operations whose deadline expired
    pub retry_timeouts: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(60),
            retry_command_failures: false,
            retry_timeouts: false,
        }
    }
}

impl RetryPolicy {
    /// Create a fixed-delay policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            ..Default::default()
        }
    }

    /// Create a policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Opt into retrying remote command failures too.
    pub fn retrying_command_failures(mut self) -> Self {
        self.retry_command_failures = true;
        self
    }

    /// Opt into retrying expired deadlines too.
    pub fn retrying_timeouts(mut self) -> Self {
        self.retry_timeouts = true;
        self
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Whether `error` should trigger another attempt under this policy.
    pub fn should_retry(&self, error: &Error) -> bool {
        error.is_retryable()
            || (self.retry_command_failures && matches!(error, Error::CommandFailed { .. }))
            || (self.retry_timeouts && matches!(error, Error::Timeout { .. }))
    }
}

/// Connection settings shared by every session in a pool.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Remote login user
    pub user: String,
    /// Default port when the target has none
    pub port: u16,
    /// Directory holding control sockets
    pub control_dir: PathBuf,
    /// Idle window a master stays alive after its last client
    pub control_persist: Duration,
    /// TCP connect deadline
    pub connect_timeout: Duration,
    /// Default deadline for a remote command
    pub command_timeout: Duration,
    /// Value for ssh's `StrictHostKeyChecking`
    pub strict_host_key_checking: String,
    /// Prefix remote commands with `sudo -n`
    pub elevate: bool,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            control_dir: std::env::temp_dir().join("mppinstall-ssh"),
            control_persist: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(600),
            strict_host_key_checking: "accept-new".to_string(),
            elevate: false,
        }
    }
}
