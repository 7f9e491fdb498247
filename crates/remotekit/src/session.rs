//! Multiplexed SSH sessions with degraded-host fallback.
//!
//! A [`SessionPool`] keeps one OpenSSH ControlMaster socket per
//! (host, port, user). The master is opened on first use and validated with
//! a canary `true` before anything else is sent through it. Hosts whose
//! master cannot be established are marked degraded and every later
//! operation on them opens a one-off connection instead.

use crate::command::RemoteCommand;
use crate::error::{Error, Result};
use crate::retry::{LogCallback, with_retry};
use crate::transport::{Invocation, RawOutput, Transport};
use crate::types::{Output, RetryPolicy, Secret, SessionKey, SshOptions, Target};
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// File name prefix of every control socket this tool creates.
pub const SOCKET_PREFIX: &str = "mppinstall-cm-";

/// SSH exits with 255 when the connection itself failed.
const SSH_TRANSPORT_FAILURE: i32 = 255;

const CANARY: &str = "true";

/// Observable state of a host's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Operations reuse the control socket
    Active,
    /// Operations use one-off connections
    Degraded,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

#[derive(Debug, Clone)]
enum SessionState {
    Active { socket: PathBuf },
    Degraded { reason: String },
}

impl SessionState {
    fn status(&self) -> SessionStatus {
        match self {
            Self::Active { .. } => SessionStatus::Active,
            Self::Degraded { .. } => SessionStatus::Degraded,
        }
    }
}

/// How an ssh/scp invocation relates to the control socket.
enum Control<'a> {
    Master(&'a Path),
    Reuse(&'a Path),
    OneOff,
}

/// Sockets opened by this process, keyed by path, with the host they serve.
type LiveSockets = Arc<Mutex<BTreeMap<PathBuf, String>>>;

// ============================================================================
// Socket naming
// ============================================================================

/// Control socket path for a session key.
///
/// Names are a fixed-length hash so long host names cannot overflow the
/// unix socket path limit.
pub fn socket_path(control_dir: &Path, key: &SessionKey) -> PathBuf {
    let hash = blake3::hash(key.to_string().as_bytes());
    let hex = hash.to_hex();
    control_dir.join(format!("{SOCKET_PREFIX}{}", &hex[..16]))
}

/// Whether a file name belongs to a control socket created by this tool.
pub fn is_control_socket(name: &str) -> bool {
    name.strip_prefix(SOCKET_PREFIX)
        .is_some_and(|rest| rest.len() == 16 && rest.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Ask the master behind `socket` to exit, then remove the socket file.
///
/// Returns false when the socket file could not be removed.
pub(crate) fn exit_master(
    transport: &dyn Transport,
    socket: &Path,
    host: &str,
    timeout: Duration,
) -> bool {
    let invocation = Invocation::new(host, "ssh").args([
        "-O".to_string(),
        "exit".to_string(),
        "-o".to_string(),
        format!("ControlPath={}", socket.display()),
        host.to_string(),
    ]);

    match transport.invoke(&invocation, timeout) {
        Ok(raw) if raw.exit_code == Some(0) => {
            log::debug!("closed control master {}", socket.display());
        }
        Ok(raw) => log::debug!(
            "control master {} not running ({})",
            socket.display(),
            raw.stderr.trim()
        ),
        Err(e) => log::debug!("failed to stop control master {}: {e}", socket.display()),
    }

    match fs::remove_file(socket) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            log::warn!("Failed to remove {}: {e}", socket.display());
            false
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// Teardown handle
// ============================================================================

/// Closes the sockets of a pool from another thread.
///
/// Used by interrupt handlers, which cannot borrow the pool itself.
#[derive(Clone)]
pub struct TeardownHandle {
    transport: Arc<dyn Transport>,
    live: LiveSockets,
    timeout: Duration,
}

impl TeardownHandle {
    /// Close every socket still open. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let sockets: Vec<(PathBuf, String)> = std::mem::take(&mut *lock(&self.live))
            .into_iter()
            .collect();
        let count = sockets.len();
        for (socket, host) in sockets {
            exit_master(self.transport.as_ref(), &socket, &host, self.timeout);
        }
        count
    }
}

impl fmt::Debug for TeardownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeardownHandle")
            .field("live", &lock(&self.live).len())
            .finish()
    }
}

// ============================================================================
// Session pool
// ============================================================================

/// Registry of per-host sessions for one run.
pub struct SessionPool {
    transport: Arc<dyn Transport>,
    options: SshOptions,
    secret: Option<Secret>,
    dry_run: bool,
    retry: RetryPolicy,
    sessions: Mutex<BTreeMap<SessionKey, SessionState>>,
    live: LiveSockets,
}

impl SessionPool {
    pub fn new(transport: Arc<dyn Transport>, options: SshOptions) -> Self {
        Self {
            transport,
            options,
            secret: None,
            dry_run: false,
            retry: RetryPolicy::default(),
            sessions: Mutex::new(BTreeMap::new()),
            live: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Authenticate every connection with a shared secret via `sshpass`.
    pub fn with_secret(mut self, secret: Option<Secret>) -> Self {
        self.secret = secret;
        self
    }

    /// Intercept mutating operations instead of running them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Handle that can close this pool's sockets from another thread.
    pub fn teardown_handle(&self) -> TeardownHandle {
        TeardownHandle {
            transport: Arc::clone(&self.transport),
            live: Arc::clone(&self.live),
            timeout: self.options.connect_timeout,
        }
    }

    fn key_for(&self, target: &Target) -> SessionKey {
        SessionKey {
            host: target.host.clone(),
            port: target.port.unwrap_or(self.options.port),
            user: self.options.user.clone(),
        }
    }

    /// Deadline for opening a master, which may include authentication.
    fn handshake_timeout(&self) -> Duration {
        self.options.connect_timeout.saturating_mul(3)
    }

    fn common_options(&self, control: &Control<'_>) -> Vec<String> {
        let mut opts = vec![
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)),
            format!(
                "StrictHostKeyChecking={}",
                self.options.strict_host_key_checking
            ),
            "ServerAliveInterval=15".to_string(),
        ];
        match control {
            Control::Master(socket) => {
                opts.push("ControlMaster=yes".to_string());
                opts.push(format!("ControlPath={}", socket.display()));
                opts.push(format!(
                    "ControlPersist={}s",
                    self.options.control_persist.as_secs()
                ));
            }
            Control::Reuse(socket) => {
                opts.push("ControlMaster=no".to_string());
                opts.push(format!("ControlPath={}", socket.display()));
            }
            Control::OneOff => {
                opts.push("ControlMaster=no".to_string());
                opts.push("ControlPath=none".to_string());
            }
        }
        opts.into_iter()
            .flat_map(|o| ["-o".to_string(), o])
            .collect()
    }

    /// Wrap a helper invocation in `sshpass -e` when a secret is configured.
    fn wrap(&self, host: &str, program: &str, args: Vec<String>) -> Invocation {
        match &self.secret {
            Some(secret) => Invocation::new(host, "sshpass")
                .arg("-e")
                .arg(program)
                .args(args)
                .env("SSHPASS", secret.clone()),
            None => Invocation::new(host, program).args(args),
        }
    }

    fn ssh(
        &self,
        key: &SessionKey,
        control: &Control<'_>,
        remote: &str,
        stdin: Option<Secret>,
    ) -> Invocation {
        let mut args = self.common_options(control);
        args.extend([
            "-p".to_string(),
            key.port.to_string(),
            "-l".to_string(),
            key.user.clone(),
            key.host.clone(),
            remote.to_string(),
        ]);
        self.wrap(&key.host, "ssh", args).stdin(stdin)
    }

    fn invoke_ok(&self, invocation: &Invocation, timeout: Duration) -> std::result::Result<(), String> {
        match self.transport.invoke(invocation, timeout) {
            Ok(raw) if raw.exit_code == Some(0) => Ok(()),
            Ok(raw) => Err(failure_message(&raw, &invocation.program)),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Open and validate a master for `key`.
    fn establish(&self, key: &SessionKey) -> SessionState {
        if let Err(e) = fs::create_dir_all(&self.options.control_dir) {
            return SessionState::Degraded {
                reason: format!(
                    "cannot create control directory {}: {e}",
                    self.options.control_dir.display()
                ),
            };
        }

        let socket = socket_path(&self.options.control_dir, key);
        log::debug!("opening control master for {key} at {}", socket.display());

        let master = self.ssh(key, &Control::Master(&socket), CANARY, None);
        if let Err(reason) = self.invoke_ok(&master, self.handshake_timeout()) {
            return SessionState::Degraded { reason };
        }
        lock(&self.live).insert(socket.clone(), key.host.clone());

        let canary = self.ssh(key, &Control::Reuse(&socket), CANARY, None);
        if let Err(reason) = self.invoke_ok(&canary, self.handshake_timeout()) {
            self.release(&socket, &key.host);
            return SessionState::Degraded {
                reason: format!("canary failed: {reason}"),
            };
        }

        SessionState::Active { socket }
    }

    fn release(&self, socket: &Path, host: &str) {
        lock(&self.live).remove(socket);
        exit_master(
            self.transport.as_ref(),
            socket,
            host,
            self.options.connect_timeout,
        );
    }

    fn record(&self, key: &SessionKey, state: SessionState) -> SessionStatus {
        if let SessionState::Degraded { reason } = &state {
            log::warn!("Session to {key} unavailable ({reason}); falling back to one-off connections");
        }
        let status = state.status();
        lock(&self.sessions).insert(key.clone(), state);
        status
    }

    /// Open the session for `target` if it does not exist yet.
    ///
    /// Never fails: a host whose session cannot be established is marked
    /// degraded and served by one-off connections.
    pub fn connect(&self, target: &Target) -> SessionStatus {
        let key = self.key_for(target);
        if let Some(state) = lock(&self.sessions).get(&key) {
            return state.status();
        }
        let state = self.establish(&key);
        self.record(&key, state)
    }

    /// Re-run the canary on an active session, re-establishing it on failure.
    pub fn ensure_alive(&self, target: &Target) -> SessionStatus {
        let key = self.key_for(target);
        let existing = lock(&self.sessions).get(&key).cloned();

        match existing {
            None => self.connect(target),
            Some(SessionState::Degraded { .. }) => SessionStatus::Degraded,
            Some(SessionState::Active { socket }) => {
                let canary = self.ssh(&key, &Control::Reuse(&socket), CANARY, None);
                match self.invoke_ok(&canary, self.handshake_timeout()) {
                    Ok(()) => SessionStatus::Active,
                    Err(reason) => {
                        log::warn!("Session to {key} lost ({reason}); re-establishing");
                        self.release(&socket, &key.host);
                        let state = self.establish(&key);
                        self.record(&key, state)
                    }
                }
            }
        }
    }

    /// Current status of a host's session, if one was attempted.
    pub fn status(&self, target: &Target) -> Option<SessionStatus> {
        lock(&self.sessions)
            .get(&self.key_for(target))
            .map(SessionState::status)
    }

    /// Hosts currently served by one-off connections.
    pub fn degraded_hosts(&self) -> Vec<String> {
        lock(&self.sessions)
            .iter()
            .filter(|(_, state)| matches!(state, SessionState::Degraded { .. }))
            .map(|(key, _)| key.host.clone())
            .collect()
    }

    fn socket_for(&self, target: &Target) -> (SessionKey, Option<PathBuf>) {
        self.connect(target);
        let key = self.key_for(target);
        let socket = match lock(&self.sessions).get(&key) {
            Some(SessionState::Active { socket }) => Some(socket.clone()),
            _ => None,
        };
        (key, socket)
    }

    /// Execute a command once and return its output, whatever its exit status.
    ///
    /// Mutating commands are intercepted in dry-run mode. An ssh exit status
    /// of 255 is reported as [`Error::Transport`].
    pub fn execute(
        &self,
        target: &Target,
        command: &RemoteCommand,
        timeout: Option<Duration>,
    ) -> Result<Output> {
        if self.dry_run && command.is_mutating() {
            log::info!("[dry-run] {target}: {command}");
            return Ok(Output::dry_run());
        }

        let (key, socket) = self.socket_for(target);
        let control = socket.as_deref().map_or(Control::OneOff, Control::Reuse);
        let rendered = command.render(self.options.elevate);
        let invocation = self.ssh(&key, &control, &rendered, command.stdin().cloned());

        log::debug!("{target}: {rendered}");
        let raw = self
            .transport
            .invoke(&invocation, timeout.unwrap_or(self.options.command_timeout))?;

        match raw.exit_code {
            Some(SSH_TRANSPORT_FAILURE) | None => Err(Error::Transport {
                host: key.host,
                message: failure_message(&raw, "ssh"),
            }),
            Some(exit_code) => Ok(Output {
                stdout: raw.stdout,
                stderr: raw.stderr,
                exit_code,
                dry_run: false,
            }),
        }
    }

    /// Execute under the retry policy, treating unaccepted exit codes as errors.
    pub fn run(&self, target: &Target, command: &RemoteCommand) -> Result<Output> {
        self.run_with_timeout(target, command, None)
    }

    /// Expired deadlines are retried for read-only commands only, unless the
    /// policy opts in: a mutating command may still be running on the host.
    pub fn run_with_timeout(
        &self,
        target: &Target,
        command: &RemoteCommand,
        timeout: Option<Duration>,
    ) -> Result<Output> {
        let policy = if command.is_mutating() {
            self.retry.clone()
        } else {
            self.retry.clone().retrying_timeouts()
        };
        let attempt = Cell::new(0u32);
        with_retry(&policy, Some(&LogCallback), || {
            if attempt.replace(attempt.get() + 1) > 0 {
                self.ensure_alive(target);
            }
            let output = self.execute(target, command, timeout)?;
            if output.dry_run || command.accepts(output.exit_code) {
                Ok(output)
            } else {
                Err(Error::CommandFailed {
                    host: target.host.clone(),
                    command: command.to_string(),
                    exit_code: output.exit_code,
                    stderr: output.stderr.trim().to_string(),
                })
            }
        })
    }

    /// Copy a local file to `remote_path` on the target, with retries.
    pub fn copy(&self, target: &Target, local: &Path, remote_path: &str) -> Result<()> {
        if !local.is_file() {
            return Err(Error::LocalFileNotFound(local.to_path_buf()));
        }
        if self.dry_run {
            log::info!("[dry-run] {target}: copy {} -> {remote_path}", local.display());
            return Ok(());
        }

        // re-sending a file is harmless, so an expired copy is retried
        let policy = self.retry.clone().retrying_timeouts();
        with_retry(&policy, Some(&LogCallback), || {
            self.copy_once(target, local, remote_path)
        })
    }

    fn copy_once(&self, target: &Target, local: &Path, remote_path: &str) -> Result<()> {
        let (key, socket) = self.socket_for(target);
        let control = socket.as_deref().map_or(Control::OneOff, Control::Reuse);

        let mut args = self.common_options(&control);
        args.extend([
            "-P".to_string(),
            key.port.to_string(),
            "-o".to_string(),
            format!("User={}", key.user),
            local.display().to_string(),
            format!("{}:{remote_path}", scp_host(&key.host)),
        ]);
        let invocation = self.wrap(&key.host, "scp", args);

        log::debug!("{target}: copy {} -> {remote_path}", local.display());
        let raw = self
            .transport
            .invoke(&invocation, self.options.command_timeout)?;
        match raw.exit_code {
            Some(0) => Ok(()),
            Some(SSH_TRANSPORT_FAILURE) | None => Err(Error::Transport {
                host: key.host,
                message: failure_message(&raw, "scp"),
            }),
            // the remote side refused the file: bad path, no space, permissions
            Some(exit_code) => Err(Error::CommandFailed {
                host: key.host,
                command: format!("scp {} {remote_path}", local.display()),
                exit_code,
                stderr: failure_message(&raw, "scp"),
            }),
        }
    }

    /// Close the session for one host.
    pub fn close(&self, target: &Target) {
        let key = self.key_for(target);
        let removed = lock(&self.sessions).remove(&key);
        if let Some(SessionState::Active { socket }) = removed {
            self.release(&socket, &key.host);
        }
    }

    /// Close every session opened by this pool. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        lock(&self.sessions).clear();
        self.teardown_handle().close_all()
    }
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("options", &self.options)
            .field("secret", &self.secret)
            .field("dry_run", &self.dry_run)
            .field("sessions", &lock(&self.sessions).len())
            .finish()
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        let closed = self.close_all();
        if closed > 0 {
            log::debug!("closed {closed} session(s) on drop");
        }
    }
}

fn failure_message(raw: &RawOutput, program: &str) -> String {
    let stderr = raw.stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match raw.exit_code {
        Some(code) => format!("{program} exited with status {code}"),
        None => format!("{program} terminated by signal"),
    }
}

/// scp needs brackets around IPv6 literals.
fn scp_host(host: &str) -> String {
    if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type Behaviour = Box<dyn Fn(&Invocation) -> Result<RawOutput> + Send + Sync>;

    /// Transport that records invocations and answers from a closure.
    struct Scripted {
        calls: Mutex<Vec<Invocation>>,
        behaviour: Behaviour,
    }

    impl Scripted {
        fn new(behaviour: impl Fn(&Invocation) -> Result<RawOutput> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                behaviour: Box::new(behaviour),
            })
        }

        fn ok() -> Arc<Self> {
            Self::new(|_| Ok(RawOutput::exited(0)))
        }

        fn calls(&self) -> Vec<Invocation> {
            lock(&self.calls).clone()
        }
    }

    impl Transport for Scripted {
        fn invoke(&self, invocation: &Invocation, _timeout: Duration) -> Result<RawOutput> {
            lock(&self.calls).push(invocation.clone());
            (self.behaviour)(invocation)
        }
    }

    fn has(inv: &Invocation, arg: &str) -> bool {
        inv.args.iter().any(|a| a == arg)
    }

    fn is_master(inv: &Invocation) -> bool {
        has(inv, "ControlMaster=yes")
    }

    fn is_exit(inv: &Invocation) -> bool {
        has(inv, "-O")
    }

    fn pool(transport: &Arc<Scripted>, dir: &TempDir) -> SessionPool {
        let options = SshOptions {
            user: "root".to_string(),
            control_dir: dir.path().to_path_buf(),
            ..SshOptions::default()
        };
        let transport: Arc<dyn Transport> = transport.clone();
        SessionPool::new(transport, options)
            .with_retry(RetryPolicy::fixed(3, Duration::from_millis(1)))
    }

    #[test]
    fn test_socket_name_is_prefixed_hash() {
        let key = SessionKey {
            host: "sdw1".to_string(),
            port: 22,
            user: "root".to_string(),
        };
        let path = socket_path(Path::new("/tmp/cm"), &key);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(is_control_socket(name));
        assert_eq!(name.len(), SOCKET_PREFIX.len() + 16);
        assert_eq!(path, socket_path(Path::new("/tmp/cm"), &key));
    }

    #[test]
    fn test_is_control_socket_rejects_foreign_names() {
        assert!(!is_control_socket("ssh-agent.sock"));
        assert!(!is_control_socket("mppinstall-cm-short"));
        assert!(!is_control_socket("mppinstall-cm-zzzzzzzzzzzzzzzz"));
    }

    #[test]
    fn test_connect_opens_master_and_runs_canary() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::ok();
        let pool = pool(&transport, &dir);
        let target = Target::new("sdw1");

        assert_eq!(pool.connect(&target), SessionStatus::Active);
        // Second connect reuses the registry entry
        assert_eq!(pool.connect(&target), SessionStatus::Active);

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert!(is_master(&calls[0]));
        assert!(has(&calls[1], "ControlMaster=no"));
        assert_eq!(calls[1].remote_command(), Some("true"));
    }

    #[test]
    fn test_execute_reuses_session() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::new(|inv| {
            Ok(RawOutput {
                exit_code: Some(0),
                stdout: if inv.remote_command() == Some("hostname") {
                    "sdw1\n".to_string()
                } else {
                    String::new()
                },
                stderr: String::new(),
            })
        });
        let pool = pool(&transport, &dir);
        let target = Target::new("sdw1");

        for _ in 0..3 {
            let out = pool
                .execute(&target, &RemoteCommand::inspect("hostname"), None)
                .unwrap();
            assert_eq!(out.stdout.trim(), "sdw1");
        }

        let calls = transport.calls();
        assert_eq!(calls.iter().filter(|c| is_master(c)).count(), 1);
        let socket = socket_path(
            dir.path(),
            &SessionKey {
                host: "sdw1".to_string(),
                port: 22,
                user: "root".to_string(),
            },
        );
        let control_path = format!("ControlPath={}", socket.display());
        assert!(calls.iter().skip(2).all(|c| has(c, &control_path)));
    }

    #[test]
    fn test_one_degraded_host_among_five() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::new(|inv| {
            if inv.host == "sdw3" && is_master(inv) {
                Ok(RawOutput {
                    exit_code: Some(255),
                    stdout: String::new(),
                    stderr: "Permission denied (publickey,password).".to_string(),
                })
            } else {
                Ok(RawOutput::exited(0))
            }
        });
        let pool = pool(&transport, &dir);
        let hosts: Vec<Target> = (1..=5).map(|i| Target::new(format!("sdw{i}"))).collect();

        for host in &hosts {
            let expected = if host.host == "sdw3" {
                SessionStatus::Degraded
            } else {
                SessionStatus::Active
            };
            assert_eq!(pool.connect(host), expected);
        }
        assert_eq!(pool.degraded_hosts(), vec!["sdw3".to_string()]);

        for host in &hosts {
            pool.run(host, &RemoteCommand::new("mkdir").args(["-p", "/data"]))
                .unwrap();
        }

        let calls = transport.calls();
        let work: Vec<&Invocation> = calls
            .iter()
            .filter(|c| c.remote_command().is_some_and(|r| r.starts_with("mkdir")))
            .collect();
        assert_eq!(work.len(), 5);
        for inv in work {
            if inv.host == "sdw3" {
                assert!(has(inv, "ControlPath=none"));
            } else {
                assert!(has(inv, "ControlMaster=no"));
                assert!(!has(inv, "ControlPath=none"));
            }
        }
        // No further master attempts after the initial connect
        assert_eq!(calls.iter().filter(|c| is_master(c)).count(), 5);
    }

    #[test]
    fn test_dry_run_intercepts_mutating_commands() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::ok();
        let pool = pool(&transport, &dir).with_dry_run(true);
        let target = Target::new("sdw1");

        let out = pool
            .run(&target, &RemoteCommand::new("rm").args(["-rf", "/data/primary"]))
            .unwrap();
        assert!(out.dry_run);
        assert!(transport.calls().is_empty());

        let local = dir.path().join("pkg.rpm");
        fs::write(&local, b"rpm").unwrap();
        pool.copy(&target, &local, "/tmp/pkg.rpm").unwrap();
        assert!(transport.calls().is_empty());

        pool.run(&target, &RemoteCommand::inspect("uname").arg("-r"))
            .unwrap();
        assert!(
            transport
                .calls()
                .iter()
                .any(|c| c.remote_command() == Some("uname -r"))
        );
    }

    #[test]
    fn test_exit_255_is_transport_failure_and_retried() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::new(|inv| {
            if inv.remote_command() == Some("hostname") {
                Ok(RawOutput {
                    exit_code: Some(255),
                    stdout: String::new(),
                    stderr: "Connection reset by peer".to_string(),
                })
            } else {
                Ok(RawOutput::exited(0))
            }
        });
        let pool = pool(&transport, &dir);
        let target = Target::new("sdw1");

        let err = pool
            .run(&target, &RemoteCommand::inspect("hostname"))
            .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert!(err.to_string().contains("Connection reset"));

        let attempts = transport
            .calls()
            .iter()
            .filter(|c| c.remote_command() == Some("hostname"))
            .count();
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_command_failure_not_retried() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::new(|inv| {
            if inv.remote_command() == Some("false") {
                Ok(RawOutput {
                    exit_code: Some(1),
                    stdout: String::new(),
                    stderr: "boom\n".to_string(),
                })
            } else {
                Ok(RawOutput::exited(0))
            }
        });
        let pool = pool(&transport, &dir);

        let err = pool
            .run(&Target::new("sdw1"), &RemoteCommand::new("false"))
            .unwrap_err();
        match err {
            Error::CommandFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
        let attempts = transport
            .calls()
            .iter()
            .filter(|c| c.remote_command() == Some("false"))
            .count();
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_timeout_propagates_unchanged() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::new(|inv| {
            if inv.remote_command() == Some("sleep 100") {
                Err(Error::Timeout {
                    host: inv.host.clone(),
                    operation: "sleep 100".to_string(),
                    timeout: Duration::from_secs(1),
                })
            } else {
                Ok(RawOutput::exited(0))
            }
        });
        let pool = pool(&transport, &dir).with_retry(RetryPolicy::no_retry());

        let err = pool
            .run_with_timeout(
                &Target::new("sdw1"),
                &RemoteCommand::inspect("sleep").arg("100"),
                Some(Duration::from_secs(1)),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[test]
    fn test_expired_mutating_command_is_not_relaunched() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::new(|inv| match inv.remote_command() {
            Some(cmd) if cmd.starts_with("gpinitsystem") || cmd.starts_with("hostname") => {
                Err(Error::Timeout {
                    host: inv.host.clone(),
                    operation: cmd.to_string(),
                    timeout: Duration::from_secs(1),
                })
            }
            _ => Ok(RawOutput::exited(0)),
        });
        let pool = pool(&transport, &dir);
        let target = Target::new("mdw");
        let launches = |prefix: &str| {
            transport
                .calls()
                .iter()
                .filter(|c| c.remote_command().is_some_and(|cmd| cmd.starts_with(prefix)))
                .count()
        };

        let err = pool
            .run_with_timeout(&target, &RemoteCommand::new("gpinitsystem"), Some(Duration::from_secs(1)))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(launches("gpinitsystem"), 1);

        // read-only commands are safe to repeat
        pool.run_with_timeout(&target, &RemoteCommand::inspect("hostname"), Some(Duration::from_secs(1)))
            .unwrap_err();
        assert_eq!(launches("hostname"), 3);

        let pool = pool.with_retry(RetryPolicy::fixed(2, Duration::from_millis(1)).retrying_timeouts());
        pool.run_with_timeout(&target, &RemoteCommand::new("gpinitsystem"), Some(Duration::from_secs(1)))
            .unwrap_err();
        assert_eq!(launches("gpinitsystem"), 3);
    }

    #[test]
    fn test_secret_travels_in_env_not_argv() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::ok();
        let pool = pool(&transport, &dir).with_secret(Some(Secret::new("s3cret")));

        pool.run(
            &Target::new("sdw1"),
            &RemoteCommand::new("chpasswd").stdin_secret(Secret::new("gpadmin:pw")),
        )
        .unwrap();

        for inv in transport.calls() {
            assert_eq!(inv.program, "sshpass");
            assert_eq!(inv.args[0], "-e");
            assert!(inv.env.iter().any(|(k, v)| k == "SSHPASS" && v.expose() == "s3cret"));
            assert!(inv.args.iter().all(|a| !a.contains("s3cret") && !a.contains(":pw")));
        }
        let chpasswd = transport
            .calls()
            .into_iter()
            .find(|c| c.remote_command() == Some("chpasswd"))
            .unwrap();
        assert_eq!(chpasswd.stdin.unwrap().expose(), "gpadmin:pw");
    }

    #[test]
    fn test_ensure_alive_reestablishes_lost_session() {
        let dir = TempDir::new().unwrap();
        let canaries = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&canaries);
        let transport = Scripted::new(move |inv| {
            if !is_master(inv) && inv.remote_command() == Some("true") {
                let mut n = lock(&counter);
                *n += 1;
                // First canary passes, the liveness check fails, the rest pass
                if *n == 2 {
                    return Ok(RawOutput::exited(255));
                }
            }
            Ok(RawOutput::exited(0))
        });
        let pool = pool(&transport, &dir);
        let target = Target::new("sdw1");

        assert_eq!(pool.connect(&target), SessionStatus::Active);
        assert_eq!(pool.ensure_alive(&target), SessionStatus::Active);

        let calls = transport.calls();
        assert_eq!(calls.iter().filter(|c| is_master(c)).count(), 2);
        assert_eq!(calls.iter().filter(|c| is_exit(c)).count(), 1);
    }

    #[test]
    fn test_copy_missing_local_file() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::ok();
        let pool = pool(&transport, &dir);

        let err = pool
            .copy(&Target::new("sdw1"), &dir.path().join("missing.rpm"), "/tmp/x")
            .unwrap_err();
        assert!(matches!(err, Error::LocalFileNotFound(_)));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_copy_uses_scp_with_port_and_session() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::ok();
        let pool = pool(&transport, &dir);
        let local = dir.path().join("server.rpm");
        fs::write(&local, b"rpm").unwrap();

        pool.copy(&Target::new("sdw1").with_port(2222), &local, "/tmp/server.rpm")
            .unwrap();

        let scp = transport
            .calls()
            .into_iter()
            .find(|c| c.program == "scp")
            .unwrap();
        assert!(has(&scp, "-P"));
        assert!(has(&scp, "2222"));
        assert!(has(&scp, "sdw1:/tmp/server.rpm"));
        assert!(has(&scp, "ControlMaster=no"));
    }

    #[test]
    fn test_copy_remote_error_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::new(|inv| {
            if inv.program == "scp" {
                Ok(RawOutput {
                    exit_code: Some(1),
                    stdout: String::new(),
                    stderr: "scp: /opt/pkgs/server.rpm: No such file or directory\n".to_string(),
                })
            } else {
                Ok(RawOutput::exited(0))
            }
        });
        let pool = pool(&transport, &dir);
        let local = dir.path().join("server.rpm");
        fs::write(&local, b"rpm").unwrap();

        let err = pool
            .copy(&Target::new("sdw1"), &local, "/opt/pkgs/server.rpm")
            .unwrap_err();

        match &err {
            Error::CommandFailed { exit_code, stderr, .. } => {
                assert_eq!(*exit_code, 1);
                assert!(stderr.contains("No such file or directory"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!err.is_retryable());
        assert_eq!(transport.calls().iter().filter(|c| c.program == "scp").count(), 1);
    }

    #[test]
    fn test_copy_connection_loss_is_retried() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::new(|inv| {
            if inv.program == "scp" {
                Ok(RawOutput::exited(255))
            } else {
                Ok(RawOutput::exited(0))
            }
        });
        let pool = pool(&transport, &dir);
        let local = dir.path().join("server.rpm");
        fs::write(&local, b"rpm").unwrap();

        let err = pool
            .copy(&Target::new("sdw1"), &local, "/tmp/server.rpm")
            .unwrap_err();

        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(transport.calls().iter().filter(|c| c.program == "scp").count(), 3);
    }

    #[test]
    fn test_close_all_exits_every_master() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::ok();
        {
            let pool = pool(&transport, &dir);
            pool.connect(&Target::new("sdw1"));
            pool.connect(&Target::new("sdw2"));
            assert_eq!(pool.close_all(), 2);
            assert!(pool.status(&Target::new("sdw1")).is_none());
        }
        // Drop after close_all has nothing left to close
        assert_eq!(transport.calls().iter().filter(|c| is_exit(c)).count(), 2);
    }

    #[test]
    fn test_drop_closes_open_sessions() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::ok();
        {
            let pool = pool(&transport, &dir);
            pool.connect(&Target::new("sdw1"));
        }
        assert_eq!(transport.calls().iter().filter(|c| is_exit(c)).count(), 1);
    }

    #[test]
    fn test_teardown_handle_from_other_thread() {
        let dir = TempDir::new().unwrap();
        let transport = Scripted::ok();
        let pool = pool(&transport, &dir);
        pool.connect(&Target::new("sdw1"));

        let handle = pool.teardown_handle();
        let closed = std::thread::spawn(move || handle.close_all()).join().unwrap();
        assert_eq!(closed, 1);
        assert_eq!(pool.close_all(), 0);
    }

    #[test]
    fn test_scp_host_brackets_ipv6() {
        assert_eq!(scp_host("fe80::1"), "[fe80::1]");
        assert_eq!(scp_host("sdw1"), "sdw1");
    }
}
