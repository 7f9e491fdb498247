//! Ctrl-C handling.
//!
//! Callbacks registered here run once, newest first, when the operator
//! interrupts the run; the process then exits with status 130. Remote
//! commands already in flight are not cancelled.

use anyhow::{Context, Result};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::incident::EXIT_INTERRUPTED;
use crate::ui;

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Clone, Default)]
pub struct CleanupRegistry {
    callbacks: Arc<Mutex<Vec<(String, Callback)>>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, Callback)>> {
        match self.callbacks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn register(&self, label: &str, callback: impl FnOnce() + Send + 'static) {
        self.lock().push((label.to_string(), Box::new(callback)));
    }

    /// Run and drop every registered callback. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let callbacks = std::mem::take(&mut *self.lock());
        let count = callbacks.len();
        for (label, callback) in callbacks.into_iter().rev() {
            log::debug!("interrupt cleanup: {label}");
            callback();
        }
        count
    }
}

/// Install the process-wide Ctrl-C handler.
pub fn install(registry: CleanupRegistry) -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!();
        ui::error("Interrupted; cleaning up");
        registry.run_all();
        std::process::exit(EXIT_INTERRUPTED);
    })
    .context("Failed to install Ctrl-C handler")
}
