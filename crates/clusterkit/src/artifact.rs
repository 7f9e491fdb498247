//! Bootstrap config serialization.
//!
//! The output is consumed verbatim by the cluster bootstrap tool, so the key
//! order and formatting below are a fixed contract. Nothing time- or
//! environment-dependent is written.

use crate::error::{Error, Result};
use crate::types::{ClusterSettings, Directories, Host};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the bootstrap config.
pub const CONFIG_FILE: &str = "cluster_init.conf";

/// File name of the segment machine list.
pub const MACHINE_LIST_FILE: &str = "hostfile_segments";

const HEADER: &str = "# Cluster bootstrap configuration generated by mppinstall";

/// Rendered bootstrap config plus its machine-list side file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigArtifact {
    pub config: String,
    pub machine_list: String,
}

/// Where [`ConfigArtifact::write_to`] put the files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub config: PathBuf,
    pub machine_list: PathBuf,
}

/// Inputs to [`render`], already validated and placed.
pub(crate) struct RenderInput<'a> {
    pub coordinator: &'a Host,
    pub settings: &'a ClusterSettings,
    pub directories: &'a Directories,
    pub primary_dirs: &'a [String],
    pub mirror_dirs: Option<&'a [String]>,
    pub machines: &'a [&'a str],
}

pub(crate) fn render(input: &RenderInput<'_>) -> ConfigArtifact {
    let settings = input.settings;
    let mut out = String::new();

    let _ = writeln!(out, "{HEADER}");
    line(&mut out, "ARRAY_NAME", &settings.array_name);
    line(&mut out, "SEG_PREFIX", &settings.segment_prefix);
    line(&mut out, "PORT_BASE", &settings.port_base.to_string());
    array(&mut out, "DATA_DIRECTORY", input.primary_dirs);
    line(&mut out, "COORDINATOR_HOSTNAME", input.coordinator.machine());
    line(&mut out, "COORDINATOR_DIRECTORY", &input.directories.coordinator);
    line(&mut out, "COORDINATOR_PORT", &settings.coordinator_port.to_string());
    line(&mut out, "TRUSTED_SHELL", &settings.trusted_shell);
    line(&mut out, "ENCODING", &settings.encoding);
    line(&mut out, "LOCALE", &settings.locale);
    line(&mut out, "DATABASE_NAME", &settings.database_name);
    line(&mut out, "MACHINE_LIST_FILE", &settings.machine_list_path());
    if let Some(mirror_dirs) = input.mirror_dirs {
        line(&mut out, "MIRROR_PORT_BASE", &settings.mirror_port_base.to_string());
        array(&mut out, "MIRROR_DATA_DIRECTORY", mirror_dirs);
    }

    let mut machine_list = String::new();
    for machine in input.machines {
        let _ = writeln!(machine_list, "{machine}");
    }

    ConfigArtifact {
        config: out,
        machine_list,
    }
}

fn line(out: &mut String, key: &str, value: &str) {
    let _ = writeln!(out, "{key}={}", shell_words::quote(value));
}

fn array(out: &mut String, key: &str, values: &[String]) {
    let quoted: Vec<_> = values.iter().map(|v| shell_words::quote(v)).collect();
    let _ = writeln!(out, "declare -a {key}=({})", quoted.join(" "));
}

impl ConfigArtifact {
    /// Write both files into `dir`, creating it if needed.
    pub fn write_to(&self, dir: &Path) -> Result<ArtifactPaths> {
        fs::create_dir_all(dir).map_err(|source| Error::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let paths = ArtifactPaths {
            config: dir.join(CONFIG_FILE),
            machine_list: dir.join(MACHINE_LIST_FILE),
        };
        for (path, content) in [
            (&paths.config, &self.config),
            (&paths.machine_list, &self.machine_list),
        ] {
            fs::write(path, content).map_err(|source| Error::Io {
                path: path.clone(),
                source,
            })?;
        }
        log::debug!("wrote bootstrap artifact to {}", dir.display());

        Ok(paths)
    }
}
