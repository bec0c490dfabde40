//! Message verification for streamcheck
//!
//! Consumed events are decoded into (offset, message id) records per
//! partition and checked for:
//! - Order: offsets contiguous, message ids non-decreasing
//! - Duplicates: no offset or message id seen twice
//! - Range: every id of an expected range present exactly once
//!
//! Events produced by other test runs are filtered out by run id, so tests
//! may share topics.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checks;
pub mod event;
pub mod ledger;
pub mod verifier;

pub use checks::{
    check_dup, check_order, check_range, DupKey, Origin, VerifyFlags, Violation, WarningLog,
    DEFAULT_VERBOSITY,
};
pub use event::{EventKind, MessageEvent};
pub use ledger::{PartitionEntry, PartitionLedger};
pub use verifier::{MessageVerifier, Scope, SharedVerifier};

#[cfg(test)]
mod send_sync {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(MessageVerifier: Send, Sync);
    assert_impl_all!(SharedVerifier: Send, Sync, Clone);
}
