//! Test harness for messaging-client integration tests
//!
//! Runs a registry of test functions concurrently under a cap, enforces
//! per-test deadlines, honors interrupts, and summarizes the run as a
//! status table and a JSON report.
//!
//! # Architecture
//!
//! - [`TestRegistry`] holds [`TestDescriptor`]s in run order
//! - [`Harness`] filters, launches and supervises them
//! - [`TestContext`] is what a running test sees of the harness
//! - [`RunSummary`] is the outcome
//!
//! Tests reach a messaging client through the [`Producer`], [`Consumer`]
//! and [`MessagingClient`] traits; [`LoopbackBroker`] implements them in
//! memory.
//!
//! # Example
//!
//! ```no_run
//! use streamcheck_harness::{Harness, HarnessConfig, TestDescriptor, TestRegistry};
//!
//! let registry = TestRegistry::new(vec![
//!     TestDescriptor::new("0001_hello", |_ctx| Ok(())),
//! ]);
//! let harness = Harness::new(registry, HarnessConfig::default())?;
//! let summary = harness.run()?;
//! print!("{}", summary.render(false));
//! # Ok::<(), streamcheck_harness::HarnessError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod loopback;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod shutdown;
pub mod state;
pub mod stats;

pub use client::{
    consume_msgs, consume_no_msgs, produce_msgs, produce_msgs_nowait, wait_delivery,
    wait_teardown, ClientError, Consumer, DeliveryReport, DeliveryTracker, MessagingClient,
    ProduceBatch, Producer, DEFAULT_MSG_SIZE,
};
pub use config::{HarnessConfig, CONFIG_FILE_NAME, CONFIG_PATH_ENV};
pub use context::{TestContext, TestFailure, TestResult};
pub use error::{HarnessError, HarnessResult};
pub use loopback::{LoopbackBroker, LoopbackConsumer, LoopbackProducer};
pub use registry::{eligibility, test_number, Eligibility, RunFilter, TestDescriptor, TestFn, TestRegistry};
pub use report::{RunSummary, TestReport};
pub use scheduler::Harness;
pub use shutdown::ShutdownSignal;
pub use state::{TestRunState, TestState};
pub use stats::StatsSink;

#[cfg(test)]
mod send_sync {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Harness: Send, Sync);
    assert_impl_all!(TestContext: Send, Sync);
    assert_impl_all!(TestDescriptor: Send, Sync, Clone);
    assert_impl_all!(LoopbackBroker: Send, Sync, Clone);
    assert_impl_all!(LoopbackProducer: Send);
    assert_impl_all!(LoopbackConsumer: Send);
    assert_impl_all!(ShutdownSignal: Send, Sync, Clone);
}
