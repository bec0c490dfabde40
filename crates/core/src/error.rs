//! Error types for streamcheck
//!
//! This module defines the error types shared by the verifier and the harness.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Low-level verification checks never produce errors: they count violations.
//! An `Error` is always fatal for the test that receives it.

use std::io;
use thiserror::Error;

/// Result type alias for streamcheck operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for streamcheck
#[derive(Debug, Error)]
pub enum Error {
    /// A message payload did not carry the expected test token
    ///
    /// Producers must always encode the token, so this is a contract
    /// violation by the system under test.
    #[error("Incorrect payload format: {payload:?}")]
    PayloadFormat {
        /// The payload as (lossy) text
        payload: String,
    },

    /// A partition was looked up without create and is unknown
    #[error("Topic {topic} [{partition}] not found in verifier")]
    PartitionNotFound {
        /// Topic name
        topic: String,
        /// Partition number
        partition: i32,
    },

    /// A verification pass found at least one violation
    #[error(
        "{what}: verification of {received} received messages failed: \
         expected msgids {first_id}..{last_id} ({expected}): {failures} failure(s)"
    )]
    VerificationFailed {
        /// Caller-supplied label for the verification point
        what: String,
        /// Messages accepted by the verifier
        received: usize,
        /// First expected message id
        first_id: i64,
        /// One past the last expected message id
        last_id: i64,
        /// Expected message count
        expected: usize,
        /// Number of violations found
        failures: usize,
    },

    /// Broker version string is not `N.N.N.N`
    #[error("Expected broker version in format N.N.N.N (N=int), not {0:?}")]
    InvalidBrokerVersion(String),

    /// Malformed configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error (report files, stats files, config files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Build a `PayloadFormat` error from raw payload bytes
    pub fn payload_format(payload: &[u8]) -> Self {
        Error::PayloadFormat {
            payload: String::from_utf8_lossy(payload).into_owned(),
        }
    }

    /// Build an `InvalidConfig` error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_payload_format() {
        let err = Error::payload_format(b"garbage");
        let msg = err.to_string();
        assert!(msg.contains("Incorrect payload format"));
        assert!(msg.contains("garbage"));
    }

    #[test]
    fn test_error_display_partition_not_found() {
        let err = Error::PartitionNotFound {
            topic: "orders".to_string(),
            partition: 3,
        };
        assert_eq!(err.to_string(), "Topic orders [3] not found in verifier");
    }

    #[test]
    fn test_error_display_verification_failed() {
        let err = Error::VerificationFailed {
            what: "consume".to_string(),
            received: 9,
            first_id: 0,
            last_id: 10,
            expected: 10,
            failures: 2,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("consume:"));
        assert!(msg.contains("9 received messages"));
        assert!(msg.contains("0..10 (10)"));
        assert!(msg.contains("2 failure(s)"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_pattern_matching() {
        let err = Error::InvalidBrokerVersion("1.2".to_string());
        match err {
            Error::InvalidBrokerVersion(s) => assert_eq!(s, "1.2"),
            _ => panic!("Wrong error variant"),
        }
    }
}
