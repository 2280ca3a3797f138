//! Cooperative cancellation token.
//!
//! Cancellation is observed only at stage and phase boundaries, never inside
//! an extraction loop, so a cancelled run leaves at most the just-finished
//! stage committed and never a half-written one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Cloneable cancellation handle shared between the caller and the engine.
#[derive(Debug, Clone, Default)]
pub struct TaskControl {
    cancelled: Arc<AtomicBool>,
}

impl TaskControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next phase boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Reset for a new operation on the same engine instance.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Phase-boundary checkpoint: errors out if cancellation was requested.
    pub fn checkpoint(&self, stage: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled(stage.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_passes_until_cancelled() {
        let control = TaskControl::new();
        assert!(control.checkpoint("fetch").is_ok());

        control.cancel();
        let err = control.checkpoint("extract").unwrap_err();
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("extract"));
    }

    #[test]
    fn test_clones_share_state() {
        let control = TaskControl::new();
        let handle = control.clone();
        handle.cancel();
        assert!(control.is_cancelled());

        control.reset();
        assert!(!handle.is_cancelled());
    }
}
