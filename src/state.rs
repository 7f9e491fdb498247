use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const MARKER_EXT: &str = "done";

// ============================================================================
// Marker
// ============================================================================

/// Body of a phase completion marker.
///
/// Presence of the file is what marks a phase complete; the body is only
/// used for status output and the configuration drift warning.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Marker {
    /// Phase name
    pub phase: String,

    /// When the phase finished
    pub completed_at: DateTime<Utc>,

    /// Fingerprint of the configuration the phase ran with
    pub fingerprint: String,
}

// ============================================================================
// PhaseMarkers
// ============================================================================

/// Phase completion markers under `<state_dir>/phases/`.
#[derive(Debug, Clone)]
pub struct PhaseMarkers {
    dir: PathBuf,
}

impl PhaseMarkers {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("phases"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, phase: &str) -> PathBuf {
        self.dir.join(format!("{phase}.{MARKER_EXT}"))
    }

    /// Whether the phase has completed.
    pub fn is_complete(&self, phase: &str) -> bool {
        self.path(phase).is_file()
    }

    /// Read a marker body. Unreadable bodies are treated as absent.
    pub fn read(&self, phase: &str) -> Option<Marker> {
        let path = self.path(phase);
        let content = fs::read_to_string(&path).ok()?;
        match toml::from_str(&content) {
            Ok(marker) => Some(marker),
            Err(e) => {
                log::warn!("Ignoring unreadable marker {}: {e}", path.display());
                None
            }
        }
    }

    /// Persist a completion marker atomically (temp file + rename).
    pub fn mark_complete(&self, phase: &str, fingerprint: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create marker directory: {}", self.dir.display())
        })?;

        let marker = Marker {
            phase: phase.to_string(),
            completed_at: Utc::now(),
            fingerprint: fingerprint.to_string(),
        };
        let content = toml::to_string_pretty(&marker).context("Failed to serialize marker")?;

        let path = self.path(phase);
        let tmp = self.dir.join(format!(".{phase}.{MARKER_EXT}.tmp"));
        fs::write(&tmp, content)
            .with_context(|| format!("Failed to write marker: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to persist marker: {}", path.display()))?;

        log::debug!("Marked phase {phase} complete at {}", path.display());
        Ok(())
    }

    /// Names of completed phases, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.dir.display()));
            }
        };

        let mut phases: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(MARKER_EXT) {
                    return None;
                }
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .filter(|s| !s.starts_with('.'))
                    .map(str::to_string)
            })
            .collect();
        phases.sort();
        Ok(phases)
    }

    /// Delete every marker. Returns how many were removed.
    pub fn clear_all(&self) -> Result<usize> {
        let phases = self.list()?;
        for phase in &phases {
            let path = self.path(phase);
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove marker: {}", path.display()))?;
        }
        if !phases.is_empty() {
            log::info!("Cleared {} phase marker(s)", phases.len());
        }
        Ok(phases.len())
    }
}

// ============================================================================
// Tests
// ============================================================================
