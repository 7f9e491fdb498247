//! Phase state machine for mppinstall
//!
//! A run walks an ordered list of phases:
//! 1. Completed phases (marker present) are skipped and rehydrated
//! 2. The first pending phase runs step by step
//! 3. Success persists its marker; any error aborts the run with no marker
//!
//! Resume granularity is the whole phase.

mod context;

pub use context::{Cursor, Orchestrator, SharedCursor, SkippedExtension, position, target};

use anyhow::Result;
use thiserror::Error;

use crate::{phases, teardown, ui};

/// One resumable unit of installation work.
pub trait Phase {
    /// Stable name, also the marker file name
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Declared number of reported steps
    fn steps(&self) -> usize;

    fn run(&self, ctx: &mut Orchestrator) -> Result<()>;

    /// Restore in-memory state later phases need when this phase is
    /// skipped because it already completed.
    fn rehydrate(&self, _ctx: &mut Orchestrator) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Resume from the first incomplete phase
    Normal,
    /// Clear every marker, then run all phases
    ForceReset,
    /// Install optional packages on an existing cluster
    ExtensionsOnly,
    /// Tear the cluster down; markers are left untouched
    Clean,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    /// Teardown problems that were logged and swallowed
    pub cleanup_failures: usize,
}

/// Context attached to an error that aborted a phase.
#[derive(Debug, Error)]
#[error("phase '{phase}' failed at step {step}/{total}")]
pub struct PhaseFailure {
    pub phase: String,
    pub step: usize,
    pub total: usize,
}

/// Run the phases selected by `mode`.
pub fn run(ctx: &mut Orchestrator, mode: RunMode) -> Result<RunSummary> {
    if mode == RunMode::Clean {
        let failures = teardown::clean(ctx)?;
        return Ok(RunSummary {
            cleanup_failures: failures,
            ..RunSummary::default()
        });
    }
    run_phases(ctx, &phases::for_mode(mode), mode)
}

/// Run an explicit phase list.
pub fn run_phases(
    ctx: &mut Orchestrator,
    phases: &[Box<dyn Phase>],
    mode: RunMode,
) -> Result<RunSummary> {
    let force = mode == RunMode::ForceReset;
    if force {
        if ctx.dry_run() {
            ui::dim("[dry-run] would clear all phase markers");
        } else {
            let cleared = ctx.markers.clear_all()?;
            log::debug!("force reset cleared {cleared} marker(s)");
        }
    }

    let mut summary = RunSummary::default();
    for phase in phases {
        let name = phase.name();

        if !force && !reruns(mode, name) && ctx.markers.is_complete(name) {
            ui::dim(&format!("{name}: already completed"));
            warn_on_drift(ctx, name);
            phase.rehydrate(ctx)?;
            summary.skipped.push(name.to_string());
            continue;
        }

        ui::section(&format!("{name}: {}", phase.description()));
        ctx.begin_phase(name, phase.steps());
        log::info!("Starting phase {name}");

        if let Err(e) = phase.run(ctx) {
            let cursor = ctx.cursor();
            return Err(e.context(PhaseFailure {
                phase: name.to_string(),
                step: cursor.step,
                total: cursor.total,
            }));
        }
        ctx.end_phase();

        if ctx.dry_run() {
            log::debug!("dry run: not marking {name} complete");
        } else {
            ctx.markers.mark_complete(name, ctx.fingerprint())?;
        }
        summary.executed.push(name.to_string());
    }

    Ok(summary)
}

/// Phases that run even when their marker is present.
fn reruns(mode: RunMode, phase: &str) -> bool {
    mode == RunMode::ExtensionsOnly && matches!(phase, "extensions" | "completion")
}

fn warn_on_drift(ctx: &Orchestrator, phase: &str) {
    if let Some(marker) = ctx.markers.read(phase)
        && marker.fingerprint != ctx.fingerprint()
    {
        ui::warn(&format!(
            "{phase} completed {} with a different configuration; rerun with --force to apply changes",
            marker.completed_at.format("%Y-%m-%d %H:%M UTC")
        ));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident;
    use crate::testing::{self, Scripted};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        fail: bool,
        journal: Journal,
    }

    impl Phase for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn description(&self) -> &'static str {
            "records its calls"
        }

        fn steps(&self) -> usize {
            2
        }

        fn run(&self, ctx: &mut Orchestrator) -> Result<()> {
            ctx.step("first");
            if self.fail {
                ctx.step("second");
                anyhow::bail!("{} broke", self.name);
            }
            self.journal.lock().unwrap().push(format!("run:{}", self.name));
            Ok(())
        }

        fn rehydrate(&self, _ctx: &mut Orchestrator) -> Result<()> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("rehydrate:{}", self.name));
            Ok(())
        }
    }

    fn recorders(journal: &Journal, failing: Option<&str>) -> Vec<Box<dyn Phase>> {
        ["init", "preflight", "host-bootstrap", "packages"]
            .into_iter()
            .map(|name| {
                Box::new(Recorder {
                    name,
                    fail: failing == Some(name),
                    journal: Arc::clone(journal),
                }) as Box<dyn Phase>
            })
            .collect()
    }

    fn entries(journal: &Journal) -> Vec<String> {
        std::mem::take(&mut *journal.lock().unwrap())
    }

    #[test]
    fn test_fresh_run_executes_everything() {
        let dir = TempDir::new().unwrap();
        let mut ctx = testing::orchestrator(dir.path(), Scripted::ok(), false);
        let journal = Journal::default();

        let summary = run_phases(&mut ctx, &recorders(&journal, None), RunMode::Normal).unwrap();

        assert_eq!(summary.executed.len(), 4);
        assert!(summary.skipped.is_empty());
        assert_eq!(
            ctx.markers.list().unwrap(),
            vec!["host-bootstrap", "init", "packages", "preflight"]
        );
    }

    #[test]
    fn test_resume_skips_completed_phases() {
        let dir = TempDir::new().unwrap();
        let mut ctx = testing::orchestrator(dir.path(), Scripted::ok(), false);
        let journal = Journal::default();
        ctx.markers.mark_complete("init", ctx.fingerprint()).unwrap();
        ctx.markers.mark_complete("preflight", ctx.fingerprint()).unwrap();

        let summary = run_phases(&mut ctx, &recorders(&journal, None), RunMode::Normal).unwrap();

        assert_eq!(summary.skipped, vec!["init", "preflight"]);
        assert_eq!(summary.executed, vec!["host-bootstrap", "packages"]);
        assert_eq!(
            entries(&journal),
            vec![
                "rehydrate:init",
                "rehydrate:preflight",
                "run:host-bootstrap",
                "run:packages"
            ]
        );
    }

    #[test]
    fn test_force_reset_runs_from_the_start() {
        let dir = TempDir::new().unwrap();
        let mut ctx = testing::orchestrator(dir.path(), Scripted::ok(), false);
        let journal = Journal::default();
        run_phases(&mut ctx, &recorders(&journal, None), RunMode::Normal).unwrap();
        entries(&journal);

        let summary = run_phases(&mut ctx, &recorders(&journal, None), RunMode::ForceReset).unwrap();

        assert_eq!(summary.executed.len(), 4);
        assert!(summary.skipped.is_empty());
        assert_eq!(entries(&journal)[0], "run:init");
        assert_eq!(ctx.markers.list().unwrap().len(), 4);
    }

    #[test]
    fn test_failure_leaves_earlier_markers_and_resumes() {
        let dir = TempDir::new().unwrap();
        let mut ctx = testing::orchestrator(dir.path(), Scripted::ok(), false);
        let journal = Journal::default();

        let err = run_phases(
            &mut ctx,
            &recorders(&journal, Some("host-bootstrap")),
            RunMode::Normal,
        )
        .unwrap_err();

        let failure = incident::find::<PhaseFailure>(&err).unwrap();
        assert_eq!(failure.phase, "host-bootstrap");
        assert_eq!((failure.step, failure.total), (2, 2));
        assert!(ctx.markers.is_complete("init"));
        assert!(ctx.markers.is_complete("preflight"));
        assert!(!ctx.markers.is_complete("host-bootstrap"));
        assert!(!ctx.markers.is_complete("packages"));

        entries(&journal);
        let summary = run_phases(&mut ctx, &recorders(&journal, None), RunMode::Normal).unwrap();
        assert_eq!(summary.skipped, vec!["init", "preflight"]);
        assert_eq!(summary.executed, vec!["host-bootstrap", "packages"]);
    }

    #[test]
    fn test_dry_run_writes_and_clears_no_markers() {
        let dir = TempDir::new().unwrap();
        let mut ctx = testing::orchestrator(dir.path(), Scripted::ok(), true);
        let journal = Journal::default();
        ctx.markers.mark_complete("init", ctx.fingerprint()).unwrap();

        let summary = run_phases(&mut ctx, &recorders(&journal, None), RunMode::ForceReset).unwrap();

        assert_eq!(summary.executed.len(), 4);
        assert_eq!(ctx.markers.list().unwrap(), vec!["init"]);
    }

    #[test]
    fn test_drifted_marker_is_still_skipped() {
        let dir = TempDir::new().unwrap();
        let mut ctx = testing::orchestrator(dir.path(), Scripted::ok(), false);
        let journal = Journal::default();
        ctx.markers.mark_complete("init", "older-config").unwrap();

        let phases = recorders(&journal, None);
        let summary = run_phases(&mut ctx, &phases[..1], RunMode::Normal).unwrap();
        assert_eq!(summary.skipped, vec!["init"]);
    }

    #[test]
    fn test_extensions_only_reruns_marked_extension_phases() {
        let dir = TempDir::new().unwrap();
        let mut ctx = testing::orchestrator(dir.path(), Scripted::ok(), false);
        let journal = Journal::default();
        for name in ["init", "preflight", "extensions", "completion"] {
            ctx.markers.mark_complete(name, ctx.fingerprint()).unwrap();
        }
        let phases: Vec<Box<dyn Phase>> = ["init", "preflight", "extensions", "completion"]
            .into_iter()
            .map(|name| {
                Box::new(Recorder {
                    name,
                    fail: false,
                    journal: Arc::clone(&journal),
                }) as Box<dyn Phase>
            })
            .collect();

        let summary = run_phases(&mut ctx, &phases, RunMode::ExtensionsOnly).unwrap();
        assert_eq!(summary.skipped, vec!["init", "preflight"]);
        assert_eq!(summary.executed, vec!["extensions", "completion"]);

        let summary = run_phases(&mut ctx, &phases, RunMode::Normal).unwrap();
        assert!(summary.executed.is_empty());
    }
}
