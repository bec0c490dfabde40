//! Messaging client interface and test helpers
//!
//! The harness does not talk to a broker itself. A client implements
//! [`Producer`], [`Consumer`] and [`MessagingClient`]; the helpers here
//! drive it the way tests need: produce a numbered batch and wait for every
//! delivery, consume into a verifier until enough messages or EOFs have
//! arrived, or assert that nothing of this run arrives.

use crate::context::{TestFailure, TestResult};
use std::thread;
use std::time::{Duration, Instant};
use streamcheck_core::{MessageToken, RunId};
use streamcheck_verifier::{
    EventKind, MessageEvent, MessageVerifier, Origin, VerifyFlags, Violation,
};
use thiserror::Error;
use tracing::{debug, info};

/// Default payload size of produced test messages
pub const DEFAULT_MSG_SIZE: usize = 128;

/// Error reported by a messaging client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ClientError(pub String);

/// Process-level view of a messaging client
pub trait MessagingClient: Send + Sync {
    /// Background threads the client is still running
    fn thread_count(&self) -> usize;

    /// Wait until every client object is released; false on timeout
    fn wait_destroyed(&self, timeout: Duration) -> bool;
}

/// Outcome of one produced message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Topic
    pub topic: String,
    /// Partition the message landed in
    pub partition: i32,
    /// Assigned offset, -1 on failure
    pub offset: i64,
    /// Delivery error, `None` on success
    pub error: Option<String>,
}

/// Producing side of a client
pub trait Producer: Send {
    /// Enqueue one message; a negative partition lets the client choose
    fn produce(&mut self, topic: &str, partition: i32, payload: Vec<u8>)
        -> Result<(), ClientError>;

    /// Delivery reports that arrived within `timeout`
    fn poll_deliveries(&mut self, timeout: Duration) -> Vec<DeliveryReport>;
}

/// Consuming side of a client
pub trait Consumer: Send {
    /// Next message, end-of-partition marker or error; `None` on timeout
    fn poll(&mut self, timeout: Duration) -> Option<MessageEvent>;
}

/// Counts outstanding deliveries of one produce batch
///
/// Any failed delivery is fatal for the test, as is a delivery beyond the
/// number of messages produced.
#[derive(Debug, Clone, Default)]
pub struct DeliveryTracker {
    remaining: usize,
}

impl DeliveryTracker {
    /// Tracker expecting no deliveries
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect one more delivery
    pub fn expect_one(&mut self) {
        self.remaining += 1;
    }

    /// Deliveries still outstanding
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Account one delivery report
    pub fn on_delivery(&mut self, report: &DeliveryReport) -> TestResult {
        if let Some(err) = &report.error {
            return Err(TestFailure::new(format!("Message delivery failed: {}", err)));
        }
        if self.remaining == 0 {
            return Err(TestFailure::new(format!(
                "Too many messages delivered (remains {})",
                self.remaining
            )));
        }
        self.remaining -= 1;
        Ok(())
    }
}

/// A numbered batch of test messages for one partition
#[derive(Debug, Clone)]
pub struct ProduceBatch<'a> {
    /// Topic
    pub topic: &'a str,
    /// Run id embedded in every payload
    pub run_id: RunId,
    /// Target partition; negative lets the client choose
    pub partition: i32,
    /// First message id
    pub msg_base: i32,
    /// Number of messages
    pub count: usize,
    /// Payload size; the token is zero-padded up to it
    pub size: usize,
}

impl<'a> ProduceBatch<'a> {
    /// Batch of `count` messages with ids from `msg_base`
    pub fn new(topic: &'a str, run_id: RunId, partition: i32, msg_base: i32, count: usize) -> Self {
        ProduceBatch {
            topic,
            run_id,
            partition,
            msg_base,
            count,
            size: DEFAULT_MSG_SIZE,
        }
    }

    /// Override the payload size
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    fn payload(&self, msg_id: i32) -> Vec<u8> {
        let mut payload = MessageToken::new(self.run_id, self.partition, msg_id).encode();
        if payload.len() < self.size {
            payload.resize(self.size, 0);
        }
        payload
    }
}

/// Produce `batch` without waiting for delivery
pub fn produce_msgs_nowait(
    producer: &mut dyn Producer,
    batch: &ProduceBatch<'_>,
    tracker: &mut DeliveryTracker,
) -> TestResult {
    info!(
        target: "streamcheck::client",
        "Produce to {} [{}]: messages #{}..{}",
        batch.topic,
        batch.partition,
        batch.msg_base,
        batch.msg_base as i64 + batch.count as i64
    );

    let started = Instant::now();
    for i in 0..batch.count {
        let msg_id = batch.msg_base + i as i32;
        producer
            .produce(batch.topic, batch.partition, batch.payload(msg_id))
            .map_err(|e| {
                TestFailure::new(format!(
                    "Failed to produce message {} to partition {}: {}",
                    msg_id, batch.partition, e
                ))
            })?;
        tracker.expect_one();
    }
    debug!(
        target: "streamcheck::client",
        "PRODUCE: duration {:.3}ms",
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

/// Poll delivery reports until `tracker` has none outstanding
pub fn wait_delivery(
    producer: &mut dyn Producer,
    tracker: &mut DeliveryTracker,
    timeout: Duration,
) -> TestResult {
    let deadline = Instant::now() + timeout;
    while tracker.remaining() > 0 {
        for report in producer.poll_deliveries(Duration::from_millis(10)) {
            tracker.on_delivery(&report)?;
        }
        if tracker.remaining() > 0 && Instant::now() >= deadline {
            return Err(TestFailure::new(format!(
                "Timed out waiting for {} delivery report(s)",
                tracker.remaining()
            )));
        }
    }
    Ok(())
}

/// Produce `batch` and wait for every delivery
pub fn produce_msgs(
    producer: &mut dyn Producer,
    batch: &ProduceBatch<'_>,
    timeout: Duration,
) -> TestResult {
    let mut tracker = DeliveryTracker::new();
    produce_msgs_nowait(producer, batch, &mut tracker)?;
    wait_delivery(producer, &mut tracker, timeout)
}

/// Consume into `verifier` until `exp_eofs` end-of-partition markers and/or
/// `exp_msgs` messages of the verifier's run have arrived
///
/// `None` leaves that condition open. A poll returning nothing within
/// `poll_timeout` fails the test, as does any client error.
pub fn consume_msgs(
    consumer: &mut dyn Consumer,
    what: &str,
    verifier: &mut MessageVerifier,
    exp_eofs: Option<usize>,
    exp_msgs: Option<usize>,
    poll_timeout: Duration,
) -> Result<usize, TestFailure> {
    info!(
        target: "streamcheck::client",
        "{}: consume {} messages",
        what,
        exp_msgs.map_or(-1, |n| n as i64)
    );

    let mut eofs = 0usize;
    let mut msgs = 0usize;
    while exp_eofs.map_or(true, |n| eofs < n) && exp_msgs.map_or(true, |n| msgs < n) {
        let event = consumer.poll(poll_timeout).ok_or_else(|| {
            TestFailure::new(format!(
                "{}: consumer poll timeout ({}/{:?} eof, {}/{:?} msgs)",
                what, eofs, exp_eofs, msgs, exp_msgs
            ))
        })?;

        match &event.kind {
            EventKind::PartitionEof => {
                info!(
                    target: "streamcheck::client",
                    "{} [{}] reached EOF at offset {}",
                    event.topic,
                    event.partition,
                    event.offset
                );
                verifier.ingest(&event)?;
                eofs += 1;
            }
            EventKind::Error(reason) => {
                return Err(TestFailure::new(format!(
                    "{} [{}] error (offset {}): {}",
                    event.topic, event.partition, event.offset, reason
                )));
            }
            EventKind::Message { .. } => {
                if verifier.ingest(&event)? {
                    msgs += 1;
                }
            }
        }
    }

    info!(
        target: "streamcheck::client",
        "{}: consumed {}/{:?} messages ({}/{:?} EOFs)",
        what,
        msgs,
        exp_msgs,
        eofs,
        exp_eofs
    );
    Ok(msgs)
}

/// Poll for `window` and fail if any message of `run_id` arrives
pub fn consume_no_msgs(
    consumer: &mut dyn Consumer,
    what: &str,
    run_id: RunId,
    window: Duration,
) -> TestResult {
    info!(
        target: "streamcheck::client",
        "{}: not expecting any messages for {}ms",
        what,
        window.as_millis()
    );

    let mut verifier = MessageVerifier::new(run_id);
    let mut unexpected = 0usize;
    let deadline = Instant::now() + window;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let event = match consumer.poll(remaining) {
            Some(event) => event,
            None => continue,
        };
        match &event.kind {
            EventKind::PartitionEof => {
                verifier.ingest(&event)?;
            }
            EventKind::Error(reason) => {
                return Err(TestFailure::new(format!(
                    "{} [{}] error (offset {}): {}",
                    event.topic, event.partition, event.offset, reason
                )));
            }
            EventKind::Message { .. } => {
                if verifier.ingest(&event)? {
                    verifier.warn(Violation::Unexpected {
                        origin: Origin::partition(&event.topic, event.partition),
                        offset: event.offset,
                    });
                    unexpected += 1;
                }
            }
        }
    }

    verifier.verify(what, 0, 0, VerifyFlags::ALL)?;
    if unexpected != 0 {
        return Err(TestFailure::new(format!(
            "Expected 0 messages, got {}",
            unexpected
        )));
    }
    Ok(())
}

/// Wait up to `timeout` for the client to stop its threads and release its
/// objects; returns the failures found
pub fn wait_teardown(
    client: &dyn MessagingClient,
    timeout: Duration,
    poll_interval: Duration,
) -> Vec<String> {
    let deadline = Instant::now() + timeout;
    let mut failures = Vec::new();

    loop {
        let threads = client.thread_count();
        if threads == 0 {
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            failures.push(format!(
                "{} thread(s) still active in messaging client",
                threads
            ));
            break;
        }
        info!(
            target: "streamcheck::client",
            "{} thread(s) in use by messaging client, waiting...",
            threads
        );
        thread::sleep(poll_interval.min(deadline - now));
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    if !client.wait_destroyed(remaining) {
        failures.push("Not all messaging client objects destroyed".to_string());
    }
    failures
}
