//! Transport abstraction for local helper processes.
//!
//! The [`Transport`] trait runs a fully-formed local invocation (`ssh`,
//! `scp`, optionally wrapped in `sshpass`) and captures its output. This
//! allows for different implementations:
//! - Real process execution via [`openssh::OpenSsh`]
//! - Scripted implementations for testing the session logic

pub mod openssh;

use crate::error::Result;
use crate::types::Secret;
use std::fmt;
use std::time::Duration;

/// A local process invocation.
///
/// Environment values and stdin are secrets; `Display` shows neither.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Host label used in error messages
    pub host: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, Secret)>,
    pub stdin: Option<Secret>,
}

impl Invocation {
    pub fn new(host: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: Secret) -> Self {
        self.env.push((key.into(), value));
        self
    }

    pub fn stdin(mut self, stdin: Option<Secret>) -> Self {
        self.stdin = stdin;
        self
    }

    /// The remote command string, when this is an `ssh` invocation.
    pub fn remote_command(&self) -> Option<&str> {
        if self.program == "ssh" || self.args.iter().any(|a| a == "ssh") {
            self.args.last().map(String::as_str)
        } else {
            None
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_words::quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_words::quote(arg))?;
        }
        Ok(())
    }
}

/// Raw result of a local helper process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    /// Exit status, `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RawOutput {
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }
}

/// Runs local helper processes for the session pool.
pub trait Transport: Send + Sync {
    /// Run `invocation` to completion or until `timeout` elapses.
    ///
    /// Returns [`crate::Error::Timeout`] when the deadline expires and
    /// [`crate::Error::Spawn`] when the program cannot be started.
    fn invoke(&self, invocation: &Invocation, timeout: Duration) -> Result<RawOutput>;
}
