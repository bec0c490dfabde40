//! streamcheck - integration-test harness for messaging clients
//!
//! Runs many client tests concurrently against a shared broker and verifies
//! that what the tests consume is exactly what they produced: per partition
//! in order, without duplicates, and complete.
//!
//! # Quick Start
//!
//! ```no_run
//! use streamcheck::{Harness, HarnessConfig, TestDescriptor, TestRegistry, VerifyFlags};
//!
//! let registry = TestRegistry::new(vec![TestDescriptor::new("0001_empty", |ctx| {
//!     let mut verifier = ctx.verifier(ctx.new_run_id());
//!     verifier.verify("nothing", 0, 0, VerifyFlags::ALL)?;
//!     Ok(())
//! })]);
//!
//! let harness = Harness::new(registry, HarnessConfig::default())?;
//! let summary = harness.run()?;
//! std::process::exit(summary.exit_code());
//! # Ok::<(), streamcheck::HarnessError>(())
//! ```
//!
//! # Architecture
//!
//! - `streamcheck-core`: run ids, records, payload codec, errors
//! - `streamcheck-verifier`: per-partition order, duplicate and range checks
//! - `streamcheck-harness`: scheduler, test context, client interface, report

pub use streamcheck_core::{
    BrokerVersion, Error, MessageRecord, MessageToken, RecordVec, Result, RunId, TestFlags,
};
pub use streamcheck_harness::*;
pub use streamcheck_verifier::*;
