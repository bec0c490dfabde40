//! Core types for streamcheck
//!
//! This crate defines the foundational types used throughout the system:
//! - RunId: correlates every message of one logical test run
//! - MessageRecord: (offset, message id) pair per consumed message
//! - RecordVec: generic growable vector for records and report entries
//! - MessageToken: payload codec shared by producers and the verifier
//! - TestFlags / BrokerVersion: descriptor capability bits and version ranges
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod payload;
pub mod record_vec;
pub mod types;
pub mod version;

pub use error::{Error, Result};
pub use payload::MessageToken;
pub use record_vec::{RecordVec, RECORD_BATCH, REPORT_BATCH};
pub use types::{MessageRecord, RunId, TestFlags};
pub use version::BrokerVersion;
