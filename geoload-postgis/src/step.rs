//! Timed log steps for long-running phases.

use std::time::Instant;

use log::info;

/// Logs `label` when created and again with the elapsed time when dropped.
#[must_use = "the step ends when the guard is dropped"]
pub(crate) struct Step {
    label: String,
    started: Instant,
}

impl Step {
    pub(crate) fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("[step] {label}");
        Self {
            label,
            started: Instant::now(),
        }
    }
}

impl Drop for Step {
    fn drop(&mut self) {
        info!("[step] {} took {:.2?}", self.label, self.started.elapsed());
    }
}
