//! Real transport that spawns the OpenSSH client tools.

use crate::error::{Error, Result};
use crate::transport::{Invocation, RawOutput, Transport};
use std::io;
use std::time::{Duration, Instant};
use subprocess::{Exec, ExitStatus, NullFile, Redirection};

/// Grace period for reaping a process after its pipes have closed.
const REAP_GRACE: Duration = Duration::from_secs(5);

/// Transport that executes real `ssh`/`scp`/`sshpass` processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenSsh;

impl OpenSsh {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for OpenSsh {
    fn invoke(&self, invocation: &Invocation, timeout: Duration) -> Result<RawOutput> {
        let started = Instant::now();
        log::trace!("running: {invocation}");

        let mut exec = Exec::cmd(&invocation.program)
            .args(invocation.args.as_slice())
            .stdout(Redirection::Pipe)
            .stderr(Redirection::Pipe);
        exec = if invocation.stdin.is_some() {
            exec.stdin(Redirection::Pipe)
        } else {
            exec.stdin(NullFile)
        };
        for (key, value) in &invocation.env {
            exec = exec.env(key, value.expose());
        }

        let mut process = exec.popen().map_err(|e| Error::Spawn {
            program: invocation.program.clone(),
            message: e.to_string(),
        })?;

        let input = invocation
            .stdin
            .as_ref()
            .map(|secret| format!("{}\n", secret.expose()).into_bytes());
        let mut communicator = process.communicate_start(input).limit_time(timeout);

        let (stdout, stderr) = match communicator.read_string() {
            Ok(captured) => captured,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                let _ = process.kill();
                let _ = process.wait_timeout(REAP_GRACE);
                return Err(Error::Timeout {
                    host: invocation.host.clone(),
                    operation: invocation
                        .remote_command()
                        .map_or_else(|| invocation.to_string(), str::to_string),
                    timeout,
                });
            }
            Err(e) => {
                let _ = process.kill();
                return Err(Error::Other(format!(
                    "failed to read output of {}: {}",
                    invocation.program, e.error
                )));
            }
        };

        let status = process
            .wait_timeout(REAP_GRACE)
            .map_err(|e| Error::Other(format!("failed to wait on {}: {e}", invocation.program)))?;

        let exit_code = match status {
            Some(ExitStatus::Exited(code)) => Some(code as i32),
            Some(_) => None,
            None => {
                let _ = process.kill();
                None
            }
        };

        log::trace!(
            "{} exited with {:?} ({:?})",
            invocation.program,
            exit_code,
            started.elapsed()
        );

        Ok(RawOutput {
            exit_code,
            stdout: stdout.unwrap_or_default(),
            stderr: stderr.unwrap_or_default(),
        })
    }
}
