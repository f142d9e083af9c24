//! Progress reporting and cancellation.
//!
//! The driver reports per-sector progress and polls the cancel flag at
//! frame boundaries; a set flag surfaces as `Error::Cancelled` after open
//! writers are finalized.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Progress sink with a cancellation check.
pub trait ProgressLogger {
    /// Report progress in [0.0, 1.0].
    fn progress(&mut self, percent: f64);

    /// Report a notable event.
    fn event(&mut self, message: &str);

    /// Whether the user requested cancellation.
    fn is_cancelled(&self) -> bool;
}

/// A progress logger that discards progress and never cancels, with an
/// externally shareable cancel flag for callers that need one.
#[derive(Default)]
pub struct NullProgress {
    cancel: Arc<AtomicBool>,
}

impl NullProgress {
    /// Create a logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that cancels this logger when set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }
}

impl ProgressLogger for NullProgress {
    fn progress(&mut self, _percent: f64) {}

    fn event(&mut self, message: &str) {
        tracing::debug!(message, "pipeline event");
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_propagates() {
        let progress = NullProgress::new();
        assert!(!progress.is_cancelled());
        progress.cancel_flag().store(true, Ordering::Relaxed);
        assert!(progress.is_cancelled());
    }
}
