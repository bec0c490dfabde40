//! Message verifier
//!
//! A `MessageVerifier` ingests the events a test consumes, keeps the ones
//! carrying its own run id in a [`PartitionLedger`], and checks them for
//! order, duplicates and completeness.
//!
//! ## Run-id filtering
//!
//! Concurrent tests share topics. Every payload carries the producing run's
//! id; events from any other run are ignored, which is what makes sharing
//! safe.
//!
//! ## Forwarding
//!
//! A verifier can forward every decoded event to a second, shared verifier
//! before filtering, so one consumption pass feeds a per-test check and a
//! global audit. Forward chains must be acyclic: forwarding locks the target.
//!
//! ## Arrival order
//!
//! Checks sort copies. The ledger keeps arrival order, so `verify` can run
//! any number of times on the same data with the same result.

use crate::checks::{
    check_dup, check_order, check_range, Origin, VerifyFlags, Violation, WarningLog,
    DEFAULT_VERBOSITY,
};
use crate::event::{EventKind, MessageEvent};
use crate::ledger::{PartitionEntry, PartitionLedger};
use parking_lot::Mutex;
use std::sync::Arc;
use streamcheck_core::{Error, MessageToken, Result, RunId};
use tracing::{debug, info, trace, warn};

/// Verifier shared between tests, e.g. a global audit
pub type SharedVerifier = Arc<Mutex<MessageVerifier>>;

/// Which partitions a check covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    /// Every partition; range checks aggregate all records
    All,
    /// A single partition
    Partition {
        /// Topic name
        topic: &'a str,
        /// Partition number
        partition: i32,
    },
}

impl Scope<'_> {
    fn covers(&self, entry: &PartitionEntry) -> bool {
        match *self {
            Scope::All => true,
            Scope::Partition { topic, partition } => {
                entry.partition() == partition && entry.topic() == topic
            }
        }
    }
}

/// Reconstructs per-partition message sequences and verifies them
#[derive(Debug)]
pub struct MessageVerifier {
    run_id: RunId,
    ledger: PartitionLedger,
    msg_count: usize,
    warnings: WarningLog,
    forward: Option<SharedVerifier>,
}

impl MessageVerifier {
    /// Verifier for `run_id` with the default warning cap
    pub fn new(run_id: RunId) -> Self {
        Self::with_verbosity(run_id, DEFAULT_VERBOSITY)
    }

    /// Verifier whose warning cap is `(verbosity + 1) * 100`
    pub fn with_verbosity(run_id: RunId, verbosity: u32) -> Self {
        MessageVerifier {
            run_id,
            ledger: PartitionLedger::new(),
            msg_count: 0,
            warnings: WarningLog::new(verbosity),
            forward: None,
        }
    }

    /// Wrap for sharing
    pub fn into_shared(self) -> SharedVerifier {
        Arc::new(Mutex::new(self))
    }

    /// Forward every decoded event to `target` before run-id filtering
    pub fn set_forward(&mut self, target: SharedVerifier) {
        self.forward = Some(target);
    }

    /// Run id this verifier accepts
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Messages accepted since creation or the last `clear`
    pub fn msg_count(&self) -> usize {
        self.msg_count
    }

    /// Partitions seen
    pub fn partition_count(&self) -> usize {
        self.ledger.len()
    }

    /// Partition history
    pub fn ledger(&self) -> &PartitionLedger {
        &self.ledger
    }

    /// EOF offset recorded for a partition
    pub fn eof_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.ledger.get(topic, partition).and_then(|p| p.eof_offset())
    }

    /// Logged violations since creation or the last `clear`
    pub fn violations(&self) -> &[Violation] {
        self.warnings.violations()
    }

    /// Violations counted but not logged
    pub fn suppressed(&self) -> usize {
        self.warnings.suppressed()
    }

    /// Record a violation found outside the built-in checks
    pub fn warn(&mut self, violation: Violation) {
        self.warnings.record(violation);
    }

    /// Ingest one event
    ///
    /// Returns `Ok(true)` if the event belongs to this run (messages and EOF
    /// markers), `Ok(false)` for foreign runs and client errors.
    ///
    /// # Errors
    /// Returns `Error::PayloadFormat` if a normal message lacks a valid token.
    pub fn ingest(&mut self, event: &MessageEvent) -> Result<bool> {
        let (in_run_id, msg_id) = match &event.kind {
            EventKind::Error(_) => return Ok(false),
            EventKind::PartitionEof => (self.run_id, None),
            EventKind::Message { payload } => {
                let payload = payload.as_deref().unwrap_or_default();
                let token = MessageToken::decode(payload)?;
                (token.run_id, Some(token.msg_id))
            }
        };

        if let Some(forward) = &self.forward {
            forward.lock().ingest(event)?;
        }

        if in_run_id != self.run_id {
            return Ok(false);
        }

        let entry = self.ledger.get_or_create(&event.topic, event.partition);
        match msg_id {
            None => entry.set_eof(event.offset),
            Some(msg_id) => {
                entry.record(event.offset, msg_id);
                trace!(
                    target: "streamcheck::verifier",
                    topic = %event.topic,
                    partition = event.partition,
                    offset = event.offset,
                    msg_id,
                    "Recv msg"
                );
                self.msg_count += 1;
            }
        }

        Ok(true)
    }

    /// Check arrival order per partition
    ///
    /// # Errors
    /// Returns `Error::PartitionNotFound` for an unknown partition scope.
    pub fn verify_order(&mut self, scope: Scope<'_>, flags: VerifyFlags) -> Result<usize> {
        self.check_scope(scope)?;
        let mut fails = 0;
        for entry in self.ledger.iter().filter(|e| scope.covers(e)) {
            let origin = Origin::partition(entry.topic(), entry.partition());
            fails += check_order(entry.records(), &origin, flags, &mut self.warnings);
        }
        Ok(fails)
    }

    /// Check for duplicate offsets and/or ids per partition
    ///
    /// # Errors
    /// Returns `Error::PartitionNotFound` for an unknown partition scope.
    pub fn verify_dup(&mut self, scope: Scope<'_>, flags: VerifyFlags) -> Result<usize> {
        self.check_scope(scope)?;
        let mut fails = 0;
        for entry in self.ledger.iter().filter(|e| scope.covers(e)) {
            let origin = Origin::partition(entry.topic(), entry.partition());
            fails += check_dup(entry.records(), &origin, flags, &mut self.warnings);
        }
        Ok(fails)
    }

    /// Check that ids `id_min..=id_max` are each present once
    ///
    /// `Scope::All` checks the records of every partition together.
    ///
    /// # Errors
    /// Returns `Error::PartitionNotFound` for an unknown partition scope.
    pub fn verify_range(
        &mut self,
        scope: Scope<'_>,
        flags: VerifyFlags,
        id_min: i64,
        id_max: i64,
    ) -> Result<usize> {
        match scope {
            Scope::All => {
                let all = self.ledger.collect_all();
                Ok(check_range(
                    &all,
                    &Origin::aggregate(),
                    flags,
                    id_min,
                    id_max,
                    &mut self.warnings,
                ))
            }
            Scope::Partition { topic, partition } => {
                self.check_scope(scope)?;
                let entry = match self.ledger.get(topic, partition) {
                    Some(entry) => entry,
                    None => return Ok(0),
                };
                let origin = Origin::partition(topic, partition);
                Ok(check_range(
                    entry.records(),
                    &origin,
                    flags,
                    id_min,
                    id_max,
                    &mut self.warnings,
                ))
            }
        }
    }

    /// Verify everything received against `expected_count` messages with
    /// ids starting at `first_id`
    ///
    /// Order and duplicate checks run per partition, the range check across
    /// all partitions, then the accepted total is compared.
    ///
    /// # Errors
    /// Returns `Error::VerificationFailed` if any check found a violation.
    pub fn verify(
        &mut self,
        what: &str,
        first_id: i32,
        expected_count: usize,
        flags: VerifyFlags,
    ) -> Result<usize> {
        info!(
            target: "streamcheck::verifier",
            "{}: Verifying {} received messages (flags {}): expecting msgids {}..{} ({})",
            what,
            self.msg_count,
            flags,
            first_id,
            first_id as i64 + expected_count as i64,
            expected_count
        );

        let mut fails = 0;
        if flags.contains(VerifyFlags::ORDER) {
            fails += self.verify_order(Scope::All, flags)?;
        }
        if flags.contains(VerifyFlags::DUP) {
            fails += self.verify_dup(Scope::All, flags)?;
        }

        if flags.contains(VerifyFlags::RANGE) && expected_count > 0 {
            let min = first_id as i64;
            let max = min + expected_count as i64 - 1;
            let all = self.ledger.collect_all();
            let origin = Origin::aggregate();
            fails += check_range(
                &all,
                &origin,
                VerifyFlags::BY_MSGID,
                min,
                max,
                &mut self.warnings,
            );
            fails += check_dup(&all, &origin, VerifyFlags::BY_MSGID, &mut self.warnings);
        }

        self.report_suppressed(what);

        if expected_count != self.msg_count {
            self.warnings.record(Violation::CountMismatch {
                expected: expected_count,
                received: self.msg_count,
            });
            fails += 1;
        }

        self.conclude(what, first_id, expected_count, fails)
    }

    /// Verify one partition: order and duplicates on its records, then
    /// require at least `expected_count` accepted messages
    ///
    /// # Errors
    /// Returns `Error::PartitionNotFound` if the partition was never seen,
    /// `Error::VerificationFailed` if any check found a violation.
    pub fn verify_partition(
        &mut self,
        what: &str,
        topic: &str,
        partition: i32,
        first_id: i32,
        expected_count: usize,
        flags: VerifyFlags,
    ) -> Result<usize> {
        info!(
            target: "streamcheck::verifier",
            "{}: Verifying {} received messages (flags {}) in {} [{}]: expecting msgids {}..{} ({})",
            what,
            self.msg_count,
            flags,
            topic,
            partition,
            first_id,
            first_id as i64 + expected_count as i64,
            expected_count
        );

        let scope = Scope::Partition { topic, partition };
        let mut fails = 0;
        if flags.contains(VerifyFlags::ORDER) {
            fails += self.verify_order(scope, flags)?;
        }
        if flags.contains(VerifyFlags::DUP) {
            fails += self.verify_dup(scope, flags)?;
        }

        if self.msg_count < expected_count {
            self.warnings.record(Violation::TooFew {
                origin: Origin::partition(topic, partition),
                expected: expected_count,
                received: self.msg_count,
            });
            fails += 1;
        }

        self.report_suppressed(what);
        self.conclude(what, first_id, expected_count, fails)
    }

    /// Release the ledger and reset counters; run id and forward link stay
    pub fn clear(&mut self) {
        self.ledger.clear();
        self.msg_count = 0;
        self.warnings.reset();
    }

    fn check_scope(&self, scope: Scope<'_>) -> Result<()> {
        match scope {
            Scope::All => {
                for entry in self.ledger.iter() {
                    debug!(
                        target: "streamcheck::verifier",
                        "Verifying {} [{}] {} msgs",
                        entry.topic(),
                        entry.partition(),
                        entry.records().len()
                    );
                }
                Ok(())
            }
            Scope::Partition { topic, partition } => match self.ledger.get(topic, partition) {
                Some(_) => Ok(()),
                None => Err(Error::PartitionNotFound {
                    topic: topic.to_string(),
                    partition,
                }),
            },
        }
    }

    fn report_suppressed(&self, what: &str) {
        if self.warnings.suppressed() > 0 {
            warn!(
                target: "streamcheck::verifier",
                "{}: {} message warning logs suppressed",
                what,
                self.warnings.suppressed()
            );
        }
    }

    fn conclude(
        &self,
        what: &str,
        first_id: i32,
        expected_count: usize,
        fails: usize,
    ) -> Result<usize> {
        let last_id = first_id as i64 + expected_count as i64;
        if fails > 0 {
            return Err(Error::VerificationFailed {
                what: what.to_string(),
                received: self.msg_count,
                first_id: first_id as i64,
                last_id,
                expected: expected_count,
                failures: fails,
            });
        }

        info!(
            target: "streamcheck::verifier",
            "{}: Verification of {} received messages succeeded: expected msgids {}..{} ({})",
            what,
            self.msg_count,
            first_id,
            last_id,
            expected_count
        );
        Ok(self.msg_count)
    }
}
