//! Installation phases in execution order.

pub mod cluster_init;
pub mod completion;
pub mod extensions;
pub mod host_bootstrap;
pub mod init;
pub mod packages;
pub mod preflight;

use crate::engine::{Phase, RunMode};

/// Every phase of a full installation, in order.
pub fn all() -> Vec<Box<dyn Phase>> {
    vec![
        Box::new(init::Init),
        Box::new(preflight::Preflight),
        Box::new(host_bootstrap::HostBootstrap),
        Box::new(packages::Packages),
        Box::new(cluster_init::ClusterInit),
        Box::new(extensions::Extensions),
        Box::new(completion::Completion),
    ]
}

/// Phases a run in `mode` walks through.
pub fn for_mode(mode: RunMode) -> Vec<Box<dyn Phase>> {
    match mode {
        RunMode::Normal | RunMode::ForceReset => all(),
        RunMode::ExtensionsOnly => vec![
            Box::new(init::Init),
            Box::new(preflight::Preflight),
            Box::new(extensions::Extensions),
            Box::new(completion::Completion),
        ],
        RunMode::Clean => Vec::new(),
    }
}
