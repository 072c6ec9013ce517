//! Shared cancellation signal for one pipeline run

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable flag raised once when any task of a run fails.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    raised: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that has not been raised
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Returns `true` if this call was the one that raised it.
    pub fn cancel(&self) -> bool {
        !self.raised.swap(true, Ordering::AcqRel)
    }

    /// Whether the signal has been raised
    pub fn is_cancelled(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}
