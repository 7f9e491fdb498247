//! # remotekit
//!
//! Multiplexed SSH remote execution for provisioning tools.
//!
//! This crate provides functionality for:
//! - One authenticated OpenSSH ControlMaster session per host, reused by every
//!   command and copy sent to that host
//! - Degraded-host fallback to one-off connections when a session cannot be
//!   established
//! - Typed, argument-safe remote command descriptors
//! - Retry policies that tell transport failures apart from remote command
//!   failures
//! - Dry-run interception of mutating operations
//! - Sweeping control sockets left behind by a crashed run
//!
//! ## Example
//!
//! ```no_run
//! use remotekit::{OpenSsh, RemoteCommand, SessionPool, SshOptions, Target};
//! use std::sync::Arc;
//!
//! let pool = SessionPool::new(Arc::new(OpenSsh::new()), SshOptions::default());
//! let host = Target::new("sdw1");
//!
//! pool.connect(&host);
//! let out = pool.run(&host, &RemoteCommand::inspect("uname").arg("-r")).unwrap();
//! println!("kernel: {}", out.stdout.trim());
//! ```

#![warn(clippy::all)]

pub mod command;
pub mod error;
pub mod retry;
pub mod session;
pub mod sweep;
pub mod transport;
pub mod types;

pub use command::RemoteCommand;
pub use error::{Error, ErrorCategory, Result};
pub use session::{SessionPool, SessionStatus, TeardownHandle};
pub use sweep::{SweepReport, sweep};
pub use transport::openssh::OpenSsh;
pub use transport::{Invocation, RawOutput, Transport};
pub use types::{Output, RetryPolicy, Secret, SessionKey, SshOptions, Target};
