//! In-process loopback messaging client
//!
//! A broker kept in memory: topics are vectors of partition logs, producers
//! append and get their delivery reports on the next poll, consumers read
//! their assigned partitions round-robin and see an end-of-partition marker
//! each time they catch up with a log. Used by the local test suite and by
//! tests of the harness itself.
//!
//! Every live producer and consumer counts as one client thread, so
//! [`Harness::wait_exit`](crate::Harness::wait_exit) notices handles that a
//! test forgot to drop.

use crate::client::{ClientError, Consumer, DeliveryReport, MessagingClient, Producer};
use parking_lot::{Condvar, Mutex};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use streamcheck_verifier::MessageEvent;
use tracing::debug;

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Vec<Vec<u8>>>>,
    round_robin: usize,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<BrokerState>,
    appended: Condvar,
    handles: AtomicUsize,
}

impl Inner {
    fn acquire(&self) {
        self.handles.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self) {
        let _state = self.state.lock();
        self.handles.fetch_sub(1, Ordering::AcqRel);
        self.appended.notify_all();
    }
}

/// In-memory broker; clones share the same topics
#[derive(Debug, Clone, Default)]
pub struct LoopbackBroker {
    inner: Arc<Inner>,
}

impl LoopbackBroker {
    /// Empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `topic` with `partitions` partitions; existing topics are kept
    pub fn create_topic(&self, topic: &str, partitions: i32) -> Result<(), ClientError> {
        if partitions <= 0 {
            return Err(ClientError(format!(
                "Invalid partition count {} for topic {}",
                partitions, topic
            )));
        }
        let mut state = self.inner.state.lock();
        state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions as usize]);
        debug!(
            target: "streamcheck::client",
            "Created topic {} with {} partitions",
            topic,
            partitions
        );
        Ok(())
    }

    /// Partitions of `topic`
    pub fn partition_count(&self, topic: &str) -> Option<i32> {
        let state = self.inner.state.lock();
        state.topics.get(topic).map(|p| p.len() as i32)
    }

    /// Messages stored in one partition
    pub fn log_len(&self, topic: &str, partition: i32) -> Option<usize> {
        let state = self.inner.state.lock();
        state
            .topics
            .get(topic)
            .and_then(|p| p.get(usize::try_from(partition).ok()?))
            .map(Vec::len)
    }

    /// Live producers and consumers
    pub fn handle_count(&self) -> usize {
        self.inner.handles.load(Ordering::Acquire)
    }

    /// New producer
    pub fn producer(&self) -> LoopbackProducer {
        self.inner.acquire();
        LoopbackProducer {
            broker: self.clone(),
            pending: VecDeque::new(),
            delivery_error: None,
            produced: 0,
        }
    }

    /// Consumer reading `assignment` from the start of each partition
    ///
    /// # Errors
    /// Returns `ClientError` if a topic or partition does not exist.
    pub fn consumer(&self, assignment: &[(&str, i32)]) -> Result<LoopbackConsumer, ClientError> {
        let state = self.inner.state.lock();
        let mut cursors = Vec::with_capacity(assignment.len());
        for &(topic, partition) in assignment {
            let count = state
                .topics
                .get(topic)
                .map(|p| p.len())
                .ok_or_else(|| ClientError(format!("Unknown topic {}", topic)))?;
            if partition < 0 || partition as usize >= count {
                return Err(ClientError(format!(
                    "Unknown partition {} [{}]",
                    topic, partition
                )));
            }
            cursors.push(Cursor {
                topic: topic.to_string(),
                partition,
                position: 0,
                at_eof: false,
            });
        }
        drop(state);

        self.inner.acquire();
        Ok(LoopbackConsumer {
            broker: self.clone(),
            cursors,
            next: 0,
        })
    }

    /// Consumer assigned every partition of `topic`
    ///
    /// # Errors
    /// Returns `ClientError` if the topic does not exist.
    pub fn subscribe(&self, topic: &str) -> Result<LoopbackConsumer, ClientError> {
        let count = self
            .partition_count(topic)
            .ok_or_else(|| ClientError(format!("Unknown topic {}", topic)))?;
        let assignment: Vec<(&str, i32)> = (0..count).map(|p| (topic, p)).collect();
        self.consumer(&assignment)
    }

    fn append(&self, topic: &str, partition: i32, payload: Vec<u8>) -> Result<(i32, i64), ClientError> {
        let mut state = self.inner.state.lock();
        let next = state.round_robin;
        let partitions = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| ClientError(format!("Unknown topic {}", topic)))?;

        let partition = if partition < 0 {
            (next % partitions.len()) as i32
        } else {
            partition
        };
        let log = partitions
            .get_mut(partition as usize)
            .ok_or_else(|| ClientError(format!("Unknown partition {} [{}]", topic, partition)))?;

        log.push(payload);
        let offset = log.len() as i64 - 1;
        state.round_robin = next.wrapping_add(1);
        self.inner.appended.notify_all();
        Ok((partition, offset))
    }
}

impl MessagingClient for LoopbackBroker {
    fn thread_count(&self) -> usize {
        self.handle_count()
    }

    fn wait_destroyed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while self.inner.handles.load(Ordering::Acquire) > 0 {
            if self
                .inner
                .appended
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return self.inner.handles.load(Ordering::Acquire) == 0;
            }
        }
        true
    }
}

/// Producer handle
#[derive(Debug)]
pub struct LoopbackProducer {
    broker: LoopbackBroker,
    pending: VecDeque<DeliveryReport>,
    delivery_error: Option<String>,
    produced: u64,
}

impl LoopbackProducer {
    /// Fail the delivery of every message produced from now on
    pub fn fail_deliveries(&mut self, reason: &str) {
        self.delivery_error = Some(reason.to_string());
    }

    /// Statistics blob in JSON
    pub fn stats_json(&self) -> String {
        json!({
            "type": "producer",
            "msg_cnt": self.produced,
            "outq_len": self.pending.len(),
        })
        .to_string()
    }
}

impl Producer for LoopbackProducer {
    fn produce(&mut self, topic: &str, partition: i32, payload: Vec<u8>) -> Result<(), ClientError> {
        let report = match &self.delivery_error {
            Some(reason) => DeliveryReport {
                topic: topic.to_string(),
                partition,
                offset: -1,
                error: Some(reason.clone()),
            },
            None => {
                let (partition, offset) = self.broker.append(topic, partition, payload)?;
                DeliveryReport {
                    topic: topic.to_string(),
                    partition,
                    offset,
                    error: None,
                }
            }
        };
        self.produced += 1;
        self.pending.push_back(report);
        Ok(())
    }

    fn poll_deliveries(&mut self, _timeout: Duration) -> Vec<DeliveryReport> {
        self.pending.drain(..).collect()
    }
}

impl Drop for LoopbackProducer {
    fn drop(&mut self) {
        self.broker.inner.release();
    }
}

#[derive(Debug)]
struct Cursor {
    topic: String,
    partition: i32,
    position: usize,
    at_eof: bool,
}

/// Consumer handle
#[derive(Debug)]
pub struct LoopbackConsumer {
    broker: LoopbackBroker,
    cursors: Vec<Cursor>,
    next: usize,
}

impl Consumer for LoopbackConsumer {
    fn poll(&mut self, timeout: Duration) -> Option<MessageEvent> {
        let deadline = Instant::now() + timeout;
        let inner = Arc::clone(&self.broker.inner);
        let mut state = inner.state.lock();

        loop {
            let n = self.cursors.len();
            for step in 0..n {
                let i = (self.next + step) % n;
                let cursor = &mut self.cursors[i];
                let log = match state
                    .topics
                    .get(&cursor.topic)
                    .and_then(|p| p.get(cursor.partition as usize))
                {
                    Some(log) => log,
                    None => {
                        return Some(MessageEvent::error(
                            &cursor.topic,
                            cursor.partition,
                            cursor.position as i64,
                            "Unknown topic or partition",
                        ))
                    }
                };

                if let Some(payload) = log.get(cursor.position) {
                    let event = MessageEvent::message(
                        &cursor.topic,
                        cursor.partition,
                        cursor.position as i64,
                        payload.clone(),
                    );
                    cursor.position += 1;
                    cursor.at_eof = false;
                    self.next = (i + 1) % n;
                    return Some(event);
                }

                if !cursor.at_eof {
                    cursor.at_eof = true;
                    self.next = (i + 1) % n;
                    return Some(MessageEvent::eof(
                        &cursor.topic,
                        cursor.partition,
                        cursor.position as i64,
                    ));
                }
            }

            if inner.appended.wait_until(&mut state, deadline).timed_out() {
                return None;
            }
        }
    }
}

impl Drop for LoopbackConsumer {
    fn drop(&mut self) {
        self.broker.inner.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use streamcheck_verifier::EventKind;

    const POLL: Duration = Duration::from_millis(50);

    #[test]
    fn test_create_topic_is_idempotent() {
        let broker = LoopbackBroker::new();
        broker.create_topic("t", 3).unwrap();
        broker.create_topic("t", 5).unwrap();
        assert_eq!(broker.partition_count("t"), Some(3));
        assert!(broker.create_topic("bad", 0).is_err());
    }

    #[test]
    fn test_produce_assigns_offsets_and_reports() {
        let broker = LoopbackBroker::new();
        broker.create_topic("t", 2).unwrap();
        let mut p = broker.producer();
        p.produce("t", 1, b"a".to_vec()).unwrap();
        p.produce("t", 1, b"b".to_vec()).unwrap();

        let reports = p.poll_deliveries(POLL);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].offset, 1);
        assert_eq!(reports[1].partition, 1);
        assert_eq!(broker.log_len("t", 1), Some(2));
        assert_eq!(broker.log_len("t", 0), Some(0));
        assert!(p.poll_deliveries(POLL).is_empty());
    }

    #[test]
    fn test_unassigned_partition_round_robins() {
        let broker = LoopbackBroker::new();
        broker.create_topic("t", 2).unwrap();
        let mut p = broker.producer();
        for _ in 0..4 {
            p.produce("t", -1, b"x".to_vec()).unwrap();
        }
        assert_eq!(broker.log_len("t", 0), Some(2));
        assert_eq!(broker.log_len("t", 1), Some(2));
    }

    #[test]
    fn test_unknown_topic_and_partition() {
        let broker = LoopbackBroker::new();
        broker.create_topic("t", 1).unwrap();
        let mut p = broker.producer();
        assert!(p.produce("nope", 0, Vec::new()).is_err());
        assert!(p.produce("t", 4, Vec::new()).is_err());
        assert!(broker.consumer(&[("t", 1)]).is_err());
        assert!(broker.subscribe("nope").is_err());
    }

    #[test]
    fn test_failed_deliveries_are_reported() {
        let broker = LoopbackBroker::new();
        broker.create_topic("t", 1).unwrap();
        let mut p = broker.producer();
        p.fail_deliveries("Broker: Message size too large");
        p.produce("t", 0, b"x".to_vec()).unwrap();
        let reports = p.poll_deliveries(POLL);
        assert_eq!(reports[0].error.as_deref(), Some("Broker: Message size too large"));
        assert_eq!(broker.log_len("t", 0), Some(0));
    }

    #[test]
    fn test_consumer_reads_then_reports_eof_once() {
        let broker = LoopbackBroker::new();
        broker.create_topic("t", 1).unwrap();
        let mut p = broker.producer();
        p.produce("t", 0, b"m0".to_vec()).unwrap();

        let mut c = broker.consumer(&[("t", 0)]).unwrap();
        let first = c.poll(POLL).unwrap();
        assert_eq!(first.offset, 0);
        assert!(matches!(first.kind, EventKind::Message { .. }));

        let eof = c.poll(POLL).unwrap();
        assert!(eof.is_eof());
        assert_eq!(eof.offset, 1);

        assert!(c.poll(Duration::from_millis(5)).is_none());

        p.produce("t", 0, b"m1".to_vec()).unwrap();
        assert_eq!(c.poll(POLL).unwrap().offset, 1);
        assert!(c.poll(POLL).unwrap().is_eof());
    }

    #[test]
    fn test_poll_wakes_on_append() {
        let broker = LoopbackBroker::new();
        broker.create_topic("t", 1).unwrap();
        let mut c = broker.consumer(&[("t", 0)]).unwrap();
        assert!(c.poll(POLL).unwrap().is_eof());

        let producer_broker = broker.clone();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let mut p = producer_broker.producer();
            p.produce("t", 0, b"late".to_vec()).unwrap();
        });

        let event = c.poll(Duration::from_secs(5)).unwrap();
        assert_eq!(event.offset, 0);
        writer.join().unwrap();
    }

    #[test]
    fn test_handles_and_wait_destroyed() {
        let broker = LoopbackBroker::new();
        broker.create_topic("t", 1).unwrap();
        let p = broker.producer();
        let c = broker.subscribe("t").unwrap();
        assert_eq!(broker.thread_count(), 2);
        assert!(!broker.wait_destroyed(Duration::from_millis(10)));

        drop(p);
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(c);
        });
        assert!(broker.wait_destroyed(Duration::from_secs(5)));
        releaser.join().unwrap();
        assert_eq!(broker.handle_count(), 0);
    }

    #[test]
    fn test_stats_json() {
        let broker = LoopbackBroker::new();
        broker.create_topic("t", 1).unwrap();
        let mut p = broker.producer();
        p.produce("t", 0, b"x".to_vec()).unwrap();
        let stats: serde_json::Value = serde_json::from_str(&p.stats_json()).unwrap();
        assert_eq!(stats["msg_cnt"], 1);
        assert_eq!(stats["outq_len"], 1);
    }
}
