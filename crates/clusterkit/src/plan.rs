//! Cluster plan generation.

use crate::artifact::{self, ConfigArtifact, RenderInput};
use crate::error::{Error, Result};
use crate::placement::{mirror_host_index, mirrors_possible};
use crate::types::{Host, Role, Topology};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// A deduplicated machine with every role and directory it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostAssignment {
    pub host: Host,
    pub roles: BTreeSet<Role>,
    /// Data directories that must exist on this machine, in plan order
    pub directories: Vec<String>,
}

impl HostAssignment {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Mirror location for one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirrorAssignment {
    pub host: Host,
    pub directory: String,
}

/// Placement of one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentAssignment {
    pub index: usize,
    pub host: Host,
    pub directory: String,
    pub mirror: Option<MirrorAssignment>,
}

/// Everything derived from a [`Topology`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterPlan {
    pub topology: Topology,
    /// Machines in first-seen order: coordinator, segments, standby
    pub hosts: Vec<HostAssignment>,
    pub segments: Vec<SegmentAssignment>,
    /// Why mirrors were not generated, when they were not
    pub mirrors_skipped: Option<String>,
    pub artifact: ConfigArtifact,
}

impl ClusterPlan {
    pub fn has_mirrors(&self) -> bool {
        self.mirrors_skipped.is_none()
    }

    /// Canonical host for the coordinator machine.
    pub fn coordinator(&self) -> &Host {
        self.canonical(&self.topology.coordinator)
    }

    /// Canonical host for the standby machine, if configured.
    pub fn standby(&self) -> Option<&Host> {
        self.topology.standby.as_ref().map(|s| self.canonical(s))
    }

    fn canonical<'a>(&'a self, host: &'a Host) -> &'a Host {
        self.hosts
            .iter()
            .map(|a| &a.host)
            .find(|h| h.same_machine(host))
            .unwrap_or(host)
    }

    /// Unique segment machines in first-seen order.
    pub fn segment_machines(&self) -> Vec<&str> {
        unique_machines(&self.topology.segments)
    }
}

fn unique_machines(hosts: &[Host]) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    hosts
        .iter()
        .map(Host::machine)
        .filter(|m| seen.insert(*m))
        .collect()
}

/// Merge hosts by machine, keeping first-seen order.
///
/// A machine listed with one explicit port keeps it everywhere; two
/// different explicit ports are a conflict.
fn canonical_hosts<'a>(hosts: impl Iterator<Item = &'a Host>) -> Result<Vec<Host>> {
    let mut order: Vec<Host> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for host in hosts {
        match index.get(host.machine()) {
            None => {
                index.insert(host.machine(), order.len());
                order.push(host.clone());
            }
            Some(&i) => match (order[i].port, host.port) {
                (Some(first), Some(second)) if first != second => {
                    return Err(Error::PortConflict {
                        address: host.address.clone(),
                        first,
                        second,
                    });
                }
                (None, Some(port)) => order[i].port = Some(port),
                _ => {}
            },
        }
    }
    Ok(order)
}

fn directory(base: &str, index: usize) -> String {
    format!("{}/seg{index}", base.trim_end_matches('/'))
}

/// Compute the cluster plan and bootstrap artifact for a topology.
///
/// Pure and deterministic: identical input yields byte-identical artifacts.
pub fn generate(topology: &Topology) -> Result<ClusterPlan> {
    if topology.segments.is_empty() {
        return Err(Error::EmptySegments);
    }
    topology.directories.validate()?;
    topology.settings.validate(topology.segments.len())?;

    let all = std::iter::once(&topology.coordinator)
        .chain(&topology.segments)
        .chain(&topology.standby);
    let canonical = canonical_hosts(all)?;
    let lookup = |host: &Host| -> Host {
        canonical
            .iter()
            .find(|c| c.same_machine(host))
            .cloned()
            .unwrap_or_else(|| host.clone())
    };

    if let Some(standby) = &topology.standby
        && standby.same_machine(&topology.coordinator)
    {
        log::warn!(
            "standby {} is on the coordinator machine and gives no failover",
            standby.machine()
        );
    }
    if unique_machines(&topology.segments).len() < topology.segments.len() {
        log::debug!("segment list repeats machines; placing several segments per machine");
    }

    let dirs = &topology.directories;
    let mirrors_skipped = if mirrors_possible(&topology.segments) {
        None
    } else if topology.segments.len() == 1 {
        Some("single segment".to_string())
    } else {
        Some("all segments are on one machine".to_string())
    };

    let segments: Vec<SegmentAssignment> = topology
        .segments
        .iter()
        .enumerate()
        .map(|(i, host)| SegmentAssignment {
            index: i,
            host: lookup(host),
            directory: directory(&dirs.segment, i),
            mirror: if mirrors_skipped.is_none() {
                mirror_host_index(&topology.segments, i).map(|j| MirrorAssignment {
                    host: lookup(&topology.segments[j]),
                    directory: directory(&dirs.mirror, i),
                })
            } else {
                None
            },
        })
        .collect();

    let mut hosts: Vec<HostAssignment> = canonical
        .iter()
        .map(|host| HostAssignment {
            host: host.clone(),
            roles: BTreeSet::new(),
            directories: Vec::new(),
        })
        .collect();
    let mut assign = |host: &Host, role: Role, dir: &str| {
        if let Some(entry) = hosts.iter_mut().find(|a| a.host.same_machine(host)) {
            entry.roles.insert(role);
            if !entry.directories.iter().any(|d| d == dir) {
                entry.directories.push(dir.to_string());
            }
        }
    };

    assign(&topology.coordinator, Role::Coordinator, &dirs.coordinator);
    for segment in &segments {
        assign(&segment.host, Role::Segment, &segment.directory);
    }
    for segment in &segments {
        if let Some(mirror) = &segment.mirror {
            assign(&mirror.host, Role::Mirror, &mirror.directory);
        }
    }
    if let Some(standby) = &topology.standby {
        assign(standby, Role::Standby, &dirs.coordinator);
    }

    let primary_dirs: Vec<String> = segments.iter().map(|s| s.directory.clone()).collect();
    let mirror_dirs: Option<Vec<String>> = mirrors_skipped.is_none().then(|| {
        segments
            .iter()
            .filter_map(|s| s.mirror.as_ref().map(|m| m.directory.clone()))
            .collect()
    });
    let machines = unique_machines(&topology.segments);

    let artifact = artifact::render(&RenderInput {
        coordinator: &topology.coordinator,
        settings: &topology.settings,
        directories: dirs,
        primary_dirs: &primary_dirs,
        mirror_dirs: mirror_dirs.as_deref(),
        machines: &machines,
    });

    Ok(ClusterPlan {
        topology: topology.clone(),
        hosts,
        segments,
        mirrors_skipped,
        artifact,
    })
}
