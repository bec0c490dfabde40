//! Order, duplicate and range checks over message vectors
//!
//! Checks never fail by themselves: each violation is handed to a
//! [`WarningLog`] and the check returns how many it found. Checks that need
//! a particular order work on a sorted copy, so the vector they inspect keeps
//! its arrival order no matter how often it is verified.

use std::fmt;
use std::ops::{BitAnd, BitOr};
use streamcheck_core::{MessageRecord, RecordVec};
use tracing::warn;

/// Selects which checks run and which keys they look at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VerifyFlags(u32);

impl VerifyFlags {
    /// Consecutive pairs in arrival order
    pub const ORDER: VerifyFlags = VerifyFlags(0x1);
    /// Adjacent equal keys after sorting
    pub const DUP: VerifyFlags = VerifyFlags(0x2);
    /// Message-id range completeness
    pub const RANGE: VerifyFlags = VerifyFlags(0x4);
    /// Apply checks to offsets
    pub const BY_OFFSET: VerifyFlags = VerifyFlags(0x1_0000);
    /// Apply checks to message ids
    pub const BY_MSGID: VerifyFlags = VerifyFlags(0x2_0000);
    /// Every check on every key
    pub const ALL: VerifyFlags = VerifyFlags(0x1 | 0x2 | 0x4 | 0x1_0000 | 0x2_0000);

    /// True if every bit of `other` is set
    pub const fn contains(&self, other: VerifyFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bits
    pub const fn bits(&self) -> u32 {
        self.0
    }
}

impl BitOr for VerifyFlags {
    type Output = VerifyFlags;

    fn bitor(self, rhs: VerifyFlags) -> VerifyFlags {
        VerifyFlags(self.0 | rhs.0)
    }
}

impl BitAnd for VerifyFlags {
    type Output = VerifyFlags;

    fn bitand(self, rhs: VerifyFlags) -> VerifyFlags {
        VerifyFlags(self.0 & rhs.0)
    }
}

impl fmt::Display for VerifyFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Where a violation was found: one partition, or `* [-1]` for aggregates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Topic name, `*` for aggregates
    pub topic: String,
    /// Partition, -1 for aggregates
    pub partition: i32,
}

impl Origin {
    /// Origin for a single partition
    pub fn partition(topic: &str, partition: i32) -> Self {
        Origin {
            topic: topic.to_string(),
            partition,
        }
    }

    /// Origin for a vector aggregated across partitions
    pub fn aggregate() -> Self {
        Origin {
            topic: "*".to_string(),
            partition: -1,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.topic, self.partition)
    }
}

/// Key a duplicate was detected on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DupKey {
    /// Same offset twice
    Offset,
    /// Same message id twice
    MsgId,
}

/// A single verification mismatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Consecutive records violate offset contiguity or id monotonicity
    OutOfOrder {
        /// Where
        origin: Origin,
        /// Arrival index of `this`
        index: usize,
        /// Records in the vector
        count: usize,
        /// Previous record in arrival order
        prev: MessageRecord,
        /// Offending record
        this: MessageRecord,
    },
    /// Two records share a key
    Duplicate {
        /// Where
        origin: Origin,
        /// Key that collided
        key: DupKey,
        /// First record
        prev: MessageRecord,
        /// Second record
        this: MessageRecord,
    },
    /// Lowest in-range id is not the range start
    RangeFirst {
        /// Where
        origin: Origin,
        /// Lowest in-range id seen
        msg_id: i32,
        /// Position in the sorted vector
        index: usize,
        /// Range start
        min: i64,
        /// Range end (inclusive)
        max: i64,
    },
    /// More in-range records than the range holds
    RangeTooMany {
        /// Where
        origin: Origin,
        /// In-range records seen so far
        seen: usize,
        /// Range size
        expected: usize,
        /// Id at which the excess was noticed
        msg_id: i32,
        /// Range start
        min: i64,
        /// Range end (inclusive)
        max: i64,
    },
    /// Ids missing between two in-range neighbours
    RangeGap {
        /// Where
        origin: Origin,
        /// Number of missing ids
        missing: i64,
        /// First missing id
        first: i64,
        /// Last missing id
        last: i64,
        /// Range start
        min: i64,
        /// Range end (inclusive)
        max: i64,
    },
    /// In-range record count differs from the range size
    RangeCount {
        /// Where
        origin: Origin,
        /// Range size
        expected: usize,
        /// In-range records seen
        seen: usize,
        /// Records below the range
        skipped: usize,
        /// Range start
        min: i64,
        /// Range end (inclusive)
        max: i64,
    },
    /// A partition received fewer messages than expected
    TooFew {
        /// Where
        origin: Origin,
        /// Expected messages
        expected: usize,
        /// Messages accepted
        received: usize,
    },
    /// Total accepted count differs from the expected count
    CountMismatch {
        /// Expected messages
        expected: usize,
        /// Messages accepted
        received: usize,
    },
    /// A message of this run arrived while none was expected
    Unexpected {
        /// Where
        origin: Origin,
        /// Offset of the unexpected message
        offset: i64,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::OutOfOrder {
                origin,
                index,
                count,
                prev,
                this,
            } => write!(
                f,
                "{} msg rcvidx #{}/{}: out of order (prev vs this): \
                 offset {} vs {}, msgid {} vs {}",
                origin, index, count, prev.offset, this.offset, prev.msg_id, this.msg_id
            ),
            Violation::Duplicate {
                origin,
                key,
                prev,
                this,
            } => write!(
                f,
                "{} duplicate msg by {:?} (prev vs this): offset {} vs {}, msgid {} vs {}",
                origin, key, prev.offset, this.offset, prev.msg_id, this.msg_id
            ),
            Violation::RangeFirst {
                origin,
                msg_id,
                index,
                min,
                max,
            } => write!(
                f,
                "{} range check: first message #{} (at mi {}) is not first in \
                 expected range {}..{}",
                origin, msg_id, index, min, max
            ),
            Violation::RangeTooMany {
                origin,
                seen,
                expected,
                msg_id,
                min,
                max,
            } => write!(
                f,
                "{} range check: too many messages received ({}/{}) at msgid {} \
                 for expected range {}..{}",
                origin, seen, expected, msg_id, min, max
            ),
            Violation::RangeGap {
                origin,
                missing,
                first,
                last,
                min,
                max,
            } => write!(
                f,
                "{} range check: {} message(s) missing between msgid {}..{} \
                 in expected range {}..{}",
                origin, missing, first, last, min, max
            ),
            Violation::RangeCount {
                origin,
                expected,
                seen,
                skipped,
                min,
                max,
            } => write!(
                f,
                "{} range check: wrong number of messages seen, wanted {} got {} \
                 in expected range {}..{} ({} messages skipped)",
                origin, expected, seen, min, max, skipped
            ),
            Violation::TooFew {
                origin,
                expected,
                received,
            } => write!(
                f,
                "{} expected {} messages but only {} received",
                origin, expected, received
            ),
            Violation::CountMismatch { expected, received } => {
                write!(f, "expected {} messages, got {}", expected, received)
            }
            Violation::Unexpected { origin, offset } => {
                write!(f, "received unexpected message on {} at offset {}", origin, offset)
            }
        }
    }
}

/// Default verbosity level; the warning cap is `(verbosity + 1) * 100`
pub const DEFAULT_VERBOSITY: u32 = 2;

/// Volume-capped sink for violations
///
/// The first `cap` violations are logged and retained; later ones are only
/// counted as suppressed.
#[derive(Debug, Clone)]
pub struct WarningLog {
    emitted: usize,
    cap: usize,
    suppressed: usize,
    retained: Vec<Violation>,
}

impl WarningLog {
    /// Sink for the given verbosity level
    pub fn new(verbosity: u32) -> Self {
        WarningLog {
            emitted: 0,
            cap: (verbosity as usize + 1) * 100,
            suppressed: 0,
            retained: Vec::new(),
        }
    }

    /// Record one violation
    pub fn record(&mut self, violation: Violation) {
        if self.emitted < self.cap {
            warn!(target: "streamcheck::verifier", "{}", violation);
            self.retained.push(violation);
        } else {
            self.suppressed += 1;
        }
        self.emitted += 1;
    }

    /// Violations recorded so far, logged or not
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Output cap
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Violations beyond the cap
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    /// Logged violations, oldest first
    pub fn violations(&self) -> &[Violation] {
        &self.retained
    }

    /// Forget everything; the cap is kept
    pub fn reset(&mut self) {
        self.emitted = 0;
        self.suppressed = 0;
        self.retained.clear();
    }
}

/// Walk consecutive pairs in arrival order
///
/// With `BY_OFFSET`, every offset must be the immediate successor of the
/// previous one. With `BY_MSGID`, ids may skip but never decrease.
pub fn check_order(
    records: &RecordVec<MessageRecord>,
    origin: &Origin,
    flags: VerifyFlags,
    log: &mut WarningLog,
) -> usize {
    let by_offset = flags.contains(VerifyFlags::BY_OFFSET);
    let by_msgid = flags.contains(VerifyFlags::BY_MSGID);
    let mut fails = 0;

    for (index, pair) in records.as_slice().windows(2).enumerate() {
        let (prev, this) = (pair[0], pair[1]);
        if (by_offset && prev.offset.checked_add(1) != Some(this.offset))
            || (by_msgid && prev.msg_id > this.msg_id)
        {
            log.record(Violation::OutOfOrder {
                origin: origin.clone(),
                index: index + 1,
                count: records.len(),
                prev,
                this,
            });
            fails += 1;
        }
    }

    fails
}

/// Flag adjacent equal keys after sorting, once by offset and once by id
pub fn check_dup(
    records: &RecordVec<MessageRecord>,
    origin: &Origin,
    flags: VerifyFlags,
    log: &mut WarningLog,
) -> usize {
    let mut fails = 0;

    if flags.contains(VerifyFlags::BY_OFFSET) {
        let sorted = records.sorted_by(|a, b| a.offset.cmp(&b.offset));
        fails += adjacent_dups(&sorted, origin, DupKey::Offset, log);
    }
    if flags.contains(VerifyFlags::BY_MSGID) {
        let sorted = records.sorted_by(|a, b| a.msg_id.cmp(&b.msg_id));
        fails += adjacent_dups(&sorted, origin, DupKey::MsgId, log);
    }

    fails
}

fn adjacent_dups(
    sorted: &RecordVec<MessageRecord>,
    origin: &Origin,
    key: DupKey,
    log: &mut WarningLog,
) -> usize {
    let mut fails = 0;
    for pair in sorted.as_slice().windows(2) {
        let (prev, this) = (pair[0], pair[1]);
        let is_dup = match key {
            DupKey::Offset => prev.offset == this.offset,
            DupKey::MsgId => prev.msg_id == this.msg_id,
        };
        if is_dup {
            log.record(Violation::Duplicate {
                origin: origin.clone(),
                key,
                prev,
                this,
            });
            fails += 1;
        }
    }
    fails
}

/// Check that ids `min..=max` are each present exactly once
///
/// Ids below `min` are skipped and counted, ids above `max` are ignored, so
/// a caller can verify a sub-range of a longer stream. Only runs with
/// `BY_MSGID`.
pub fn check_range(
    records: &RecordVec<MessageRecord>,
    origin: &Origin,
    flags: VerifyFlags,
    min: i64,
    max: i64,
    log: &mut WarningLog,
) -> usize {
    if !flags.contains(VerifyFlags::BY_MSGID) {
        return 0;
    }

    let sorted = records.sorted_by(|a, b| a.msg_id.cmp(&b.msg_id));
    let expected = (max - min + 1).max(0) as usize;
    let mut fails = 0;
    let mut seen = 0usize;
    let mut skipped = 0usize;
    let mut prev: Option<i64> = None;

    for (index, this) in sorted.iter().enumerate() {
        let id = this.msg_id as i64;
        if id < min {
            skipped += 1;
            continue;
        } else if id > max {
            break;
        }

        seen += 1;
        if seen == 1 {
            if id != min {
                log.record(Violation::RangeFirst {
                    origin: origin.clone(),
                    msg_id: this.msg_id,
                    index,
                    min,
                    max,
                });
                fails += 1;
            }
        } else if seen > expected {
            log.record(Violation::RangeTooMany {
                origin: origin.clone(),
                seen,
                expected,
                msg_id: this.msg_id,
                min,
                max,
            });
            fails += 1;
        }

        // Equal neighbours are duplicates, not gaps
        if let Some(p) = prev {
            if id > p + 1 {
                log.record(Violation::RangeGap {
                    origin: origin.clone(),
                    missing: id - p - 1,
                    first: p + 1,
                    last: id - 1,
                    min,
                    max,
                });
                fails += 1;
            }
        }
        prev = Some(id);
    }

    if seen != expected {
        log.record(Violation::RangeCount {
            origin: origin.clone(),
            expected,
            seen,
            skipped,
            min,
            max,
        });
        fails += 1;
    }

    fails
}
