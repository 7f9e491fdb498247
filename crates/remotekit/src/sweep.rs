//! Cleanup of control sockets left behind by earlier runs.

use crate::error::{Error, Result};
use crate::session::{exit_master, is_control_socket};
use crate::transport::Transport;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sweep deadline per socket.
const EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Sockets closed and removed
    pub closed: Vec<PathBuf>,
    /// Sockets that could not be removed
    pub failed: Vec<PathBuf>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Force-close every control socket this tool created under `control_dir`.
///
/// Sockets are matched by name only, so leftovers from a crashed run are
/// closed regardless of which process opened them. A missing directory is
/// an empty sweep, which makes the operation idempotent.
pub fn sweep(control_dir: &Path, transport: &dyn Transport) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    let entries = match fs::read_dir(control_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(Error::io(control_dir, e)),
    };

    let mut sockets: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_name().to_str().is_some_and(is_control_socket))
        .map(|entry| entry.path())
        .collect();
    sockets.sort();

    for socket in sockets {
        log::debug!("sweeping {}", socket.display());
        // ControlPath is given literally, so the host argument is a placeholder
        if exit_master(transport, &socket, "localhost", EXIT_TIMEOUT) {
            report.closed.push(socket);
        } else {
            report.failed.push(socket);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Invocation, RawOutput};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Invocation>>);

    impl Transport for Recorder {
        fn invoke(&self, invocation: &Invocation, _timeout: Duration) -> Result<RawOutput> {
            self.0.lock().unwrap().push(invocation.clone());
            Ok(RawOutput::exited(255))
        }
    }

    #[test]
    fn test_sweep_removes_only_own_sockets() {
        let dir = TempDir::new().unwrap();
        let ours = dir.path().join("mppinstall-cm-0123456789abcdef");
        let foreign = dir.path().join("agent.sock");
        let lookalike = dir.path().join("mppinstall-cm-notahash");
        for path in [&ours, &foreign, &lookalike] {
            fs::write(path, b"").unwrap();
        }

        let transport = Recorder::default();
        let report = sweep(dir.path(), &transport).unwrap();

        assert_eq!(report.closed, vec![ours.clone()]);
        assert!(report.is_clean());
        assert!(!ours.exists());
        assert!(foreign.exists());
        assert!(lookalike.exists());

        let calls = transport.0.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].args.iter().any(|a| a == "-O"));
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("mppinstall-cm-fedcba9876543210"), b"").unwrap();
        let transport = Recorder::default();

        assert_eq!(sweep(dir.path(), &transport).unwrap().closed.len(), 1);
        assert_eq!(sweep(dir.path(), &transport).unwrap(), SweepReport::default());
    }

    #[test]
    fn test_sweep_missing_directory() {
        let dir = TempDir::new().unwrap();
        let report = sweep(&dir.path().join("absent"), &Recorder::default()).unwrap();
        assert!(report.closed.is_empty());
    }
}
