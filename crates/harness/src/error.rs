//! Scheduler-level errors
//!
//! Every `HarnessError` returned from [`Harness::run`](crate::Harness::run)
//! means the harness cannot make forward progress. The binary prints the
//! summary and aborts; library callers decide for themselves.

use crate::state::TestState;
use std::io;
use std::time::Duration;
use streamcheck_core::Error;
use thiserror::Error;

/// Result type alias for harness operations
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Harness errors
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A running test exceeded its deadline
    #[error("Test {name} timed out (timeout set to {} seconds)", timeout.as_secs_f64())]
    TestTimedOut {
        /// Test name
        name: String,
        /// Effective timeout, multiplier applied
        timeout: Duration,
    },

    /// A test failed while assert-on-failure is enabled
    #[error("Test {name} failed and assert-on-failure is enabled")]
    AssertOnFail {
        /// Test name
        name: String,
    },

    /// The worker thread for a test could not be started
    #[error("Failed to start thread for test {name}: {source}")]
    Spawn {
        /// Test name
        name: String,
        /// OS error
        #[source]
        source: io::Error,
    },

    /// A run state was asked to make a transition it does not allow
    #[error("Invalid state transition for test {name}: {from} -> {to}")]
    InvalidTransition {
        /// Test name
        name: String,
        /// Current state
        from: TestState,
        /// Requested state
        to: TestState,
    },

    /// Error from the core crate (configuration, I/O)
    #[error(transparent)]
    Core(#[from] Error),

    /// The run report could not be produced
    #[error("Report error: {0}")]
    Report(String),
}

impl HarnessError {
    /// True for the conditions the binary must abort on
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::TestTimedOut { .. }
                | HarnessError::AssertOnFail { .. }
                | HarnessError::Spawn { .. }
        )
    }
}

impl From<io::Error> for HarnessError {
    fn from(e: io::Error) -> Self {
        HarnessError::Core(Error::Io(e))
    }
}
