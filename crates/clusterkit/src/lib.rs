//! # clusterkit
//!
//! Topology planning for MPP database clusters.
//!
//! This crate turns an abstract host list into concrete per-segment
//! directory assignments, places mirrors so that no mirror shares a machine
//! with its primary, and serializes the bootstrap configuration consumed by
//! the cluster init tool.
//!
//! ## Example
//!
//! ```
//! use clusterkit::{Host, Topology, generate};
//!
//! let topology = Topology::new(
//!     Host::new("mdw"),
//!     vec![Host::new("sdw1"), Host::new("sdw2"), Host::new("sdw3")],
//! );
//! let plan = generate(&topology).unwrap();
//!
//! assert_eq!(plan.segments.len(), 3);
//! assert!(plan.has_mirrors());
//! assert_eq!(plan.artifact.machine_list, "sdw1\nsdw2\nsdw3\n");
//! ```

#![warn(clippy::all)]

pub mod artifact;
pub mod error;
pub mod placement;
pub mod plan;
pub mod types;
pub mod validate;

pub use artifact::{ArtifactPaths, ConfigArtifact};
pub use error::{Error, ErrorCategory, Result};
pub use placement::mirror_host_index;
pub use plan::{ClusterPlan, HostAssignment, MirrorAssignment, SegmentAssignment, generate};
pub use types::{ClusterSettings, Directories, Host, Role, Topology};
