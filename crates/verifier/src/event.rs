//! Delivery/consumption events as seen by the verifier

/// What a consumed event carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A normal message; the payload should hold a test token
    Message {
        /// Raw payload, `None` for null-value messages
        payload: Option<Vec<u8>>,
    },
    /// No further messages are currently available on the partition
    PartitionEof,
    /// Any other error reported by the client
    Error(String),
}

/// One event from the messaging client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Topic the event belongs to
    pub topic: String,
    /// Partition the event belongs to
    pub partition: i32,
    /// Message offset, or the EOF position for end-of-partition markers
    pub offset: i64,
    /// Event payload or marker
    pub kind: EventKind,
}

impl MessageEvent {
    /// Normal message event
    pub fn message(topic: &str, partition: i32, offset: i64, payload: Vec<u8>) -> Self {
        MessageEvent {
            topic: topic.to_string(),
            partition,
            offset,
            kind: EventKind::Message {
                payload: Some(payload),
            },
        }
    }

    /// End-of-partition marker at `offset`
    pub fn eof(topic: &str, partition: i32, offset: i64) -> Self {
        MessageEvent {
            topic: topic.to_string(),
            partition,
            offset,
            kind: EventKind::PartitionEof,
        }
    }

    /// Error event
    pub fn error(topic: &str, partition: i32, offset: i64, reason: impl Into<String>) -> Self {
        MessageEvent {
            topic: topic.to_string(),
            partition,
            offset,
            kind: EventKind::Error(reason.into()),
        }
    }

    /// True for end-of-partition markers
    pub fn is_eof(&self) -> bool {
        matches!(self.kind, EventKind::PartitionEof)
    }

    /// True for error events other than end-of-partition
    pub fn is_error(&self) -> bool {
        matches!(self.kind, EventKind::Error(_))
    }
}
