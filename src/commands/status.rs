use anyhow::Result;
use colored::Colorize;
use std::fs;
use std::path::Path;

use crate::Context;
use crate::incident;
use crate::paths;
use crate::phases;
use crate::state::{Marker, PhaseMarkers};
use crate::ui;

/// Progress of one phase as shown by `status`.
#[derive(Debug)]
pub struct PhaseRow {
    pub name: &'static str,
    pub description: &'static str,
    pub marker: Option<Marker>,
    /// Completed with a different configuration than the current one
    pub drifted: bool,
}

pub fn phase_rows(markers: &PhaseMarkers, fingerprint: Option<&str>) -> Vec<PhaseRow> {
    phases::all()
        .iter()
        .map(|phase| {
            let marker = markers.read(phase.name());
            let drifted = match (&marker, fingerprint) {
                (Some(m), Some(current)) => m.fingerprint != current,
                _ => false,
            };
            PhaseRow {
                name: phase.name(),
                description: phase.description(),
                marker,
                drifted,
            }
        })
        .collect()
}

pub fn run(ctx: &Context) -> Result<()> {
    let state_dir = ctx.state_dir()?;
    let config_path = ctx.config_path()?;

    ui::header("mppinstall status");
    ui::kv("Config", &config_path.display().to_string());
    ui::kv("State", &state_dir.display().to_string());

    let config = match ctx.load_config() {
        Ok(config) => Some(config),
        Err(e) => {
            ui::warn(&format!("{e:#}"));
            None
        }
    };
    let fingerprint = config.as_ref().map(|c| c.fingerprint());

    ui::section("Phases");
    let rows = phase_rows(&PhaseMarkers::new(&state_dir), fingerprint.as_deref());
    for row in &rows {
        let state = match &row.marker {
            Some(marker) if row.drifted => format!(
                "{} {} (config changed since)",
                "⚠".yellow(),
                marker.completed_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            Some(marker) => format!(
                "{} {}",
                "✓".green(),
                marker.completed_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => format!("{} {}", "○".dimmed(), "pending".dimmed()),
        };
        println!("  {:<16} {:<28} {}", row.name.bold(), row.description.dimmed(), state);
    }
    let done = rows.iter().filter(|r| r.marker.is_some()).count();
    ui::kv("Completed", &format!("{done}/{}", rows.len()));

    ui::section("Last incident");
    match incident::last(&paths::incident_log(&state_dir)) {
        Some(last) => {
            ui::kv("When", &last.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string());
            ui::kv("Category", last.category.as_str());
            if let (Some(phase), Some(step)) = (&last.phase, &last.step) {
                ui::kv("Phase", &format!("{phase} (step {step})"));
            }
            if let Some(host) = &last.host {
                ui::kv("Host", host);
            }
            if let Some(command) = &last.command {
                ui::kv("Command", command);
            }
            ui::kv("Message", &last.message);
        }
        None => ui::dim("none recorded"),
    }

    let control_dir = match &config {
        Some(config) => config.ssh_options().control_dir,
        None => remotekit::SshOptions::default().control_dir,
    };
    let sockets = count_sockets(&control_dir);
    if sockets > 0 {
        println!();
        ui::warn(&format!(
            "{sockets} control socket(s) left in {}",
            control_dir.display()
        ));
        ui::dim("Run: mppinstall sweep");
    }

    println!();
    Ok(())
}

fn count_sockets(control_dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(control_dir) else {
        return 0;
    };
    entries
        .filter_map(std::result::Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(remotekit::session::is_control_socket)
        })
        .count()
}
