//! Cooperative interrupt handling
//!
//! The first interrupt stops the scheduler from launching further tests
//! while running ones finish. What to do on the second is up to the caller;
//! the binary exits immediately.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts interrupt requests; clones share the count
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    requests: Arc<AtomicUsize>,
}

impl ShutdownSignal {
    /// Signal with no requests
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one interrupt; returns how many have been received
    pub fn request(&self) -> usize {
        self.requests.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// True once any interrupt was received
    pub fn is_requested(&self) -> bool {
        self.count() > 0
    }

    /// Interrupts received
    pub fn count(&self) -> usize {
        self.requests.load(Ordering::Acquire)
    }
}
