//! Core types for cluster topology.

use crate::error::{Error, Result};
use crate::validate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Host
// ============================================================================

/// A network-addressable machine.
///
/// Machine identity is the address alone; the port only says how to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Host {
    pub address: String,
    pub port: Option<u16>,
}

impl Host {
    /// Create a host without an explicit port.
    ///
    /// Use [`Host::parse`] for untrusted input.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Parse `addr`, `addr:port`, `[v6addr]:port` or a bare IPv6 address.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidHost {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let s = input.trim();
        if s.is_empty() {
            return Err(invalid("empty host"));
        }

        let (address, port) = if let Some(rest) = s.strip_prefix('[') {
            let (addr, tail) = rest
                .split_once(']')
                .ok_or_else(|| invalid("missing closing ']'"))?;
            match tail {
                "" => (addr, None),
                _ => {
                    let port = tail
                        .strip_prefix(':')
                        .ok_or_else(|| invalid("expected ':' after ']'"))?;
                    (addr, Some(port))
                }
            }
        } else if s.matches(':').count() == 1 {
            let (addr, port) = s.split_once(':').ok_or_else(|| invalid("bad port"))?;
            (addr, Some(port))
        } else {
            (s, None)
        };

        if address.is_empty() {
            return Err(invalid("empty address"));
        }
        if address.starts_with('-') {
            return Err(invalid("address must not start with '-'"));
        }
        if !address
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '%'))
        {
            return Err(invalid("address contains unsupported characters"));
        }

        let port = match port {
            None => None,
            Some(p) => match p.parse::<u16>() {
                Ok(0) | Err(_) => return Err(invalid("port must be 1-65535")),
                Ok(p) => Some(p),
            },
        };

        Ok(Self {
            address: address.to_string(),
            port,
        })
    }

    /// Machine identity used for dedup and mirror placement.
    pub fn machine(&self) -> &str {
        &self.address
    }

    /// Whether both hosts are the same machine.
    pub fn same_machine(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) if self.address.contains(':') => write!(f, "[{}]:{port}", self.address),
            Some(port) => write!(f, "{}:{port}", self.address),
            None => f.write_str(&self.address),
        }
    }
}

impl FromStr for Host {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Host {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Host> for String {
    fn from(host: Host) -> Self {
        host.to_string()
    }
}

// ============================================================================
// Roles
// ============================================================================

/// Logical role of a machine in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Coordinator,
    Segment,
    Mirror,
    Standby,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coordinator => write!(f, "coordinator"),
            Self::Segment => write!(f, "segment"),
            Self::Mirror => write!(f, "mirror"),
            Self::Standby => write!(f, "standby"),
        }
    }
}

// ============================================================================
// Topology input
// ============================================================================

/// Base directories per role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Directories {
    /// Parent of the coordinator (and standby) data directory
    pub coordinator: String,
    /// Parent of primary segment directories
    pub segment: String,
    /// Parent of mirror segment directories
    pub mirror: String,
}

impl Default for Directories {
    fn default() -> Self {
        Self {
            coordinator: "/data/coordinator".to_string(),
            segment: "/data/primary".to_string(),
            mirror: "/data/mirror".to_string(),
        }
    }
}

impl Directories {
    pub fn validate(&self) -> Result<()> {
        validate::path("coordinator directory", &self.coordinator)?;
        validate::path("segment directory", &self.segment)?;
        validate::path("mirror directory", &self.mirror)?;
        Ok(())
    }
}

/// Settings copied into the bootstrap config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub array_name: String,
    pub database_name: String,
    pub segment_prefix: String,
    pub coordinator_port: u16,
    pub port_base: u16,
    pub mirror_port_base: u16,
    pub encoding: String,
    pub locale: String,
    pub trusted_shell: String,
    /// Remote directory the artifact is uploaded to on the coordinator
    pub work_dir: String,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            array_name: "MPP Cluster".to_string(),
            database_name: "mppdb".to_string(),
            segment_prefix: "gpseg".to_string(),
            coordinator_port: 5432,
            port_base: 6000,
            mirror_port_base: 7000,
            encoding: "UNICODE".to_string(),
            locale: "en_US.utf8".to_string(),
            trusted_shell: "ssh".to_string(),
            work_dir: "/tmp/mppinstall".to_string(),
        }
    }
}

impl ClusterSettings {
    pub fn validate(&self, segment_count: usize) -> Result<()> {
        validate::label("array name", &self.array_name)?;
        validate::identifier("database name", &self.database_name)?;
        validate::identifier("segment prefix", &self.segment_prefix)?;
        validate::token("encoding", &self.encoding)?;
        validate::token("locale", &self.locale)?;
        validate::token("trusted shell", &self.trusted_shell)?;
        validate::path("work directory", &self.work_dir)?;

        for (field, port) in [
            ("coordinator port", self.coordinator_port),
            ("port base", self.port_base),
            ("mirror port base", self.mirror_port_base),
        ] {
            if port == 0 {
                return Err(Error::setting(field, "0", "must be 1-65535"));
            }
        }
        for (field, base) in [
            ("port base", self.port_base),
            ("mirror port base", self.mirror_port_base),
        ] {
            if usize::from(base) + segment_count > usize::from(u16::MAX) {
                return Err(Error::setting(
                    field,
                    &base.to_string(),
                    format!("leaves no room for {segment_count} segment ports"),
                ));
            }
        }
        Ok(())
    }

    /// Path of the machine list on the coordinator.
    pub fn machine_list_path(&self) -> String {
        format!(
            "{}/{}",
            self.work_dir.trim_end_matches('/'),
            crate::artifact::MACHINE_LIST_FILE
        )
    }

    /// Path of the bootstrap config on the coordinator.
    pub fn config_path(&self) -> String {
        format!(
            "{}/{}",
            self.work_dir.trim_end_matches('/'),
            crate::artifact::CONFIG_FILE
        )
    }
}

/// Abstract cluster description from which a plan is generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub coordinator: Host,
    /// Segment index is the position in this list; repeats are allowed
    pub segments: Vec<Host>,
    pub standby: Option<Host>,
    pub directories: Directories,
    pub settings: ClusterSettings,
}

impl Topology {
    pub fn new(coordinator: Host, segments: Vec<Host>) -> Self {
        Self {
            coordinator,
            segments,
            standby: None,
            directories: Directories::default(),
            settings: ClusterSettings::default(),
        }
    }

    pub fn with_standby(mut self, standby: Host) -> Self {
        self.standby = Some(standby);
        self
    }

    pub fn with_directories(mut self, directories: Directories) -> Self {
        self.directories = directories;
        self
    }

    pub fn with_settings(mut self, settings: ClusterSettings) -> Self {
        self.settings = settings;
        self
    }
}
