//! Orchestrator context threaded through every phase.

use anyhow::{Result, anyhow};
use clusterkit::{ArtifactPaths, ClusterPlan, Host};
use remotekit::{Secret, SessionPool, SessionStatus, Target};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::Config;
use crate::state::PhaseMarkers;
use crate::ui;

/// Position of the running phase, shared with the interrupt handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    pub phase: Option<&'static str>,
    pub step: usize,
    pub total: usize,
}

pub type SharedCursor = Arc<Mutex<Cursor>>;

fn lock(cursor: &SharedCursor) -> MutexGuard<'_, Cursor> {
    match cursor.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Snapshot of the shared cursor as `(phase, step, total)`.
pub fn position(cursor: &SharedCursor) -> Option<(&'static str, usize, usize)> {
    let guard = lock(cursor);
    guard.phase.map(|phase| (phase, guard.step, guard.total))
}

/// A package that could not be installed on a host during `extensions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedExtension {
    pub package: String,
    pub host: String,
    pub reason: String,
}

/// Everything a phase needs: configuration, sessions, markers and the
/// in-memory results earlier phases produced.
pub struct Orchestrator {
    pub config: Config,
    pub pool: SessionPool,
    pub markers: PhaseMarkers,
    state_dir: PathBuf,
    fingerprint: String,
    account_secret: Option<Secret>,
    plan: Option<ClusterPlan>,
    artifacts: Option<ArtifactPaths>,
    bootstrap_output: Option<String>,
    skipped_extensions: Vec<SkippedExtension>,
    cursor: SharedCursor,
}

impl Orchestrator {
    pub fn new(config: Config, pool: SessionPool, state_dir: &Path) -> Self {
        let fingerprint = config.fingerprint();
        Self {
            config,
            pool,
            markers: PhaseMarkers::new(state_dir),
            state_dir: state_dir.to_path_buf(),
            fingerprint,
            account_secret: None,
            plan: None,
            artifacts: None,
            bootstrap_output: None,
            skipped_extensions: Vec::new(),
            cursor: SharedCursor::default(),
        }
    }

    pub fn with_account_secret(mut self, secret: Option<Secret>) -> Self {
        self.account_secret = secret;
        self
    }

    pub fn dry_run(&self) -> bool {
        self.pool.is_dry_run()
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn account_secret(&self) -> Option<&Secret> {
        self.account_secret.as_ref()
    }

    // ========================================================================
    // Step cursor
    // ========================================================================

    pub fn cursor_handle(&self) -> SharedCursor {
        Arc::clone(&self.cursor)
    }

    pub fn cursor(&self) -> Cursor {
        lock(&self.cursor).clone()
    }

    /// Reset the cursor for a phase about to run.
    pub fn begin_phase(&self, phase: &'static str, total: usize) {
        *lock(&self.cursor) = Cursor {
            phase: Some(phase),
            step: 0,
            total,
        };
    }

    pub fn end_phase(&self) {
        *lock(&self.cursor) = Cursor::default();
    }

    /// Advance to the next step and print it.
    pub fn step(&self, msg: &str) {
        let (phase, step, total) = {
            let mut cursor = lock(&self.cursor);
            cursor.step += 1;
            (cursor.phase.unwrap_or("-"), cursor.step, cursor.total)
        };
        if step > total {
            log::warn!("{phase}: step {step} exceeds the declared {total} steps");
        }
        ui::step(step, total, msg);
    }

    // ========================================================================
    // Results of earlier phases
    // ========================================================================

    pub fn set_plan(&mut self, plan: ClusterPlan) {
        self.plan = Some(plan);
    }

    pub fn plan(&self) -> Result<&ClusterPlan> {
        self.plan
            .as_ref()
            .ok_or_else(|| anyhow!("cluster plan is not available; the init phase has not run"))
    }

    pub fn set_artifacts(&mut self, paths: ArtifactPaths) {
        self.artifacts = Some(paths);
    }

    pub fn artifacts(&self) -> Result<&ArtifactPaths> {
        self.artifacts
            .as_ref()
            .ok_or_else(|| anyhow!("bootstrap artifacts are not available; the init phase has not run"))
    }

    pub fn set_bootstrap_output(&mut self, output: String) {
        self.bootstrap_output = Some(output);
    }

    pub fn bootstrap_output(&self) -> Option<&str> {
        self.bootstrap_output.as_deref()
    }

    pub fn skip_extension(&mut self, skipped: SkippedExtension) {
        self.skipped_extensions.push(skipped);
    }

    pub fn skipped_extensions(&self) -> &[SkippedExtension] {
        &self.skipped_extensions
    }

    /// Targets for every machine in the plan, in plan order.
    pub fn targets(&self) -> Result<Vec<Target>> {
        Ok(self.plan()?.hosts.iter().map(|a| target(&a.host)).collect())
    }

    /// Canary every target's session before a batch of remote work.
    pub fn refresh_sessions(&self, targets: &[Target]) {
        for target in targets {
            if self.pool.ensure_alive(target) == SessionStatus::Degraded {
                log::debug!("{target}: continuing over one-off connections");
            }
        }
    }
}

/// Session target for a planned host.
pub fn target(host: &Host) -> Target {
    match host.port {
        Some(port) => Target::new(host.address.clone()).with_port(port),
        None => Target::new(host.address.clone()),
    }
}
