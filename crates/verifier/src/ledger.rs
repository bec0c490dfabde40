//! Per-partition message history
//!
//! Entries are keyed by (topic, partition) and created on first use. Lookup
//! is a linear scan: a verifier sees tens of partitions at most.

use streamcheck_core::{MessageRecord, RecordVec};

/// Message history of one (topic, partition)
#[derive(Debug, Clone)]
pub struct PartitionEntry {
    topic: String,
    partition: i32,
    records: RecordVec<MessageRecord>,
    eof_offset: Option<i64>,
}

impl PartitionEntry {
    fn new(topic: &str, partition: i32) -> Self {
        PartitionEntry {
            topic: topic.to_string(),
            partition,
            records: RecordVec::new(),
            eof_offset: None,
        }
    }

    /// Topic name (owned copy)
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Partition number
    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Records in arrival order
    pub fn records(&self) -> &RecordVec<MessageRecord> {
        &self.records
    }

    /// Append a record in arrival order
    pub fn record(&mut self, offset: i64, msg_id: i32) {
        let slot = self.records.append();
        slot.offset = offset;
        slot.msg_id = msg_id;
    }

    /// Offset of the last end-of-partition signal, if any was seen
    pub fn eof_offset(&self) -> Option<i64> {
        self.eof_offset
    }

    /// Record an end-of-partition signal
    pub fn set_eof(&mut self, offset: i64) {
        self.eof_offset = Some(offset);
    }

    fn matches(&self, topic: &str, partition: i32) -> bool {
        self.partition == partition && self.topic == topic
    }
}

/// Keyed collection of partition entries
#[derive(Debug, Clone, Default)]
pub struct PartitionLedger {
    entries: Vec<PartitionEntry>,
}

impl PartitionLedger {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for (topic, partition), creating it if needed
    pub fn get_or_create(&mut self, topic: &str, partition: i32) -> &mut PartitionEntry {
        match self.entries.iter().position(|e| e.matches(topic, partition)) {
            Some(i) => &mut self.entries[i],
            None => {
                self.entries.push(PartitionEntry::new(topic, partition));
                let last = self.entries.len() - 1;
                &mut self.entries[last]
            }
        }
    }

    /// Entry for (topic, partition) without creating it
    pub fn get(&self, topic: &str, partition: i32) -> Option<&PartitionEntry> {
        self.entries.iter().find(|e| e.matches(topic, partition))
    }

    /// Entries in creation order
    pub fn iter(&self) -> std::slice::Iter<'_, PartitionEntry> {
        self.entries.iter()
    }

    /// Number of partitions seen
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no partition was seen
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of every record across all partitions, partition by partition
    pub fn collect_all(&self) -> RecordVec<MessageRecord> {
        let mut all = RecordVec::new();
        all.ensure_capacity(self.entries.iter().map(|e| e.records.len()).sum());
        for entry in &self.entries {
            all.extend_from(&entry.records);
        }
        all
    }

    /// Release every entry
    pub fn clear(&mut self) {
        self.entries = Vec::new();
    }
}
