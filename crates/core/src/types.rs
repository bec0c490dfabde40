//! Core types for streamcheck
//!
//! This module defines the foundational types:
//! - RunId: correlates all messages of one logical test execution
//! - MessageRecord: (offset, message id) pair kept per partition
//! - TestFlags: capability bits carried by test descriptors

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Run identifier correlating events to one logical test run
///
/// Concurrent tests share broker and topic namespaces; each one embeds its
/// own RunId in every payload and ignores events carrying any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(u64);

impl RunId {
    /// Wrap a raw identifier
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Generate a random identifier
    pub fn generate() -> Self {
        Self(rand::thread_rng().gen())
    }

    /// Raw 64-bit value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One consumed message as seen by the verifier
///
/// `offset` is assigned by the messaging system and is contiguous within a
/// partition. `msg_id` is the test's own sequence number from the payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MessageRecord {
    /// Stream position within the partition
    pub offset: i64,
    /// Test-assigned message sequence number
    pub msg_id: i32,
}

impl MessageRecord {
    /// Create a record
    pub const fn new(offset: i64, msg_id: i32) -> Self {
        Self { offset, msg_id }
    }
}

/// Capability flags of a test descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestFlags(u32);

impl TestFlags {
    /// No flags
    pub const NONE: TestFlags = TestFlags(0);
    /// Runs without a live broker
    pub const LOCAL: TestFlags = TestFlags(0x1);
    /// Expected to fail; excluded from the exit code
    pub const KNOWN_ISSUE: TestFlags = TestFlags(0x4);

    /// Raw bits
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// True if no bit is set
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set in `self`
    pub const fn contains(&self, other: TestFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if `self` and `other` share any bit
    pub const fn intersects(&self, other: TestFlags) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for TestFlags {
    type Output = TestFlags;

    fn bitor(self, rhs: TestFlags) -> TestFlags {
        TestFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for TestFlags {
    fn bitor_assign(&mut self, rhs: TestFlags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for TestFlags {
    type Output = TestFlags;

    fn bitand(self, rhs: TestFlags) -> TestFlags {
        TestFlags(self.0 & rhs.0)
    }
}

impl fmt::Display for TestFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(TestFlags::LOCAL) {
            names.push("local");
        }
        if self.contains(TestFlags::KNOWN_ISSUE) {
            names.push("known_issue");
        }
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}
