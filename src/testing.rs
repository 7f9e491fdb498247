//! Shared fixtures for unit tests: a scripted transport and a ready-made
//! orchestrator over a three-segment cluster.

use remotekit::{Invocation, RawOutput, RetryPolicy, SessionPool, Transport};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::Config;
use crate::engine::Orchestrator;

type Behaviour = Box<dyn Fn(&Invocation) -> remotekit::Result<RawOutput> + Send + Sync>;

/// Transport that records every invocation and answers from a closure.
pub struct Scripted {
    calls: Mutex<Vec<Invocation>>,
    behaviour: Behaviour,
}

impl Scripted {
    pub fn new(
        behaviour: impl Fn(&Invocation) -> remotekit::Result<RawOutput> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            behaviour: Box::new(behaviour),
        })
    }

    /// Every command succeeds with empty output.
    pub fn ok() -> Arc<Self> {
        Self::new(|_| Ok(RawOutput::exited(0)))
    }

    /// A fresh cluster: no service account yet, directories owned by
    /// `gpadmin` once created.
    pub fn fresh_cluster() -> Arc<Self> {
        Self::new(|inv| Ok(fresh_cluster_answer(inv)))
    }

    pub fn calls(&self) -> Vec<Invocation> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Remote command strings sent over ssh, excluding session plumbing.
    pub fn remote_commands(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter(|inv| !inv.args.iter().any(|a| a == "-O"))
            .filter_map(|inv| inv.remote_command().map(str::to_string))
            .filter(|cmd| cmd != "true")
            .collect()
    }

    /// Number of `scp` invocations.
    pub fn copies(&self) -> usize {
        self.calls().iter().filter(|inv| inv.program == "scp").count()
    }
}

impl Transport for Scripted {
    fn invoke(&self, invocation: &Invocation, _timeout: Duration) -> remotekit::Result<RawOutput> {
        match self.calls.lock() {
            Ok(mut calls) => calls.push(invocation.clone()),
            Err(poisoned) => poisoned.into_inner().push(invocation.clone()),
        }
        (self.behaviour)(invocation)
    }
}

pub fn fresh_cluster_answer(inv: &Invocation) -> RawOutput {
    let cmd = inv.remote_command().unwrap_or_default();
    if cmd.starts_with("stat ") {
        RawOutput {
            exit_code: Some(0),
            stdout: "gpadmin\n".to_string(),
            stderr: String::new(),
        }
    } else if cmd.starts_with("id -u") {
        RawOutput::exited(1)
    } else if cmd.starts_with("getent group") {
        RawOutput::exited(2)
    } else {
        RawOutput::exited(0)
    }
}

pub const CLUSTER: &str = r#"
[cluster]
coordinator = "mdw"
segments = ["sdw1", "sdw2", "sdw3"]

[packages]
server = "SERVER"
"#;

/// Config for a coordinator plus three segments, with a real local server
/// package under `dir`.
pub fn config(dir: &Path) -> Config {
    let server = dir.join("mppdb-server.rpm");
    std::fs::write(&server, b"rpm").unwrap();
    let mut config = Config::from_toml(CLUSTER).unwrap();
    config.packages.server = server.to_string_lossy().to_string();
    config
}

pub fn pool(dir: &Path, transport: Arc<Scripted>, dry_run: bool) -> SessionPool {
    let mut options = remotekit::SshOptions::default();
    options.control_dir = dir.join("cm");
    let transport: Arc<dyn Transport> = transport;
    SessionPool::new(transport, options)
        .with_dry_run(dry_run)
        .with_retry(RetryPolicy::fixed(3, Duration::from_millis(1)))
}

pub fn orchestrator(dir: &Path, transport: Arc<Scripted>, dry_run: bool) -> Orchestrator {
    Orchestrator::new(config(dir), pool(dir, transport, dry_run), &dir.join("state"))
}
