//! Built-in test suite
//!
//! Every test here is `LOCAL`: it runs against the in-process loopback
//! broker, so the suite exercises the scheduler and the verifier without a
//! live cluster.

use std::time::Duration;
use streamcheck_core::{RunId, TestFlags};
use streamcheck_harness::{
    consume_msgs, consume_no_msgs, produce_msgs, LoopbackBroker, ProduceBatch, TestContext,
    TestDescriptor, TestFailure, TestRegistry, TestResult,
};
use streamcheck_verifier::{MessageVerifier, VerifyFlags};

const POLL_TIMEOUT: Duration = Duration::from_secs(10);
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// The suite, bound to `broker`
pub fn registry(broker: &LoopbackBroker) -> TestRegistry {
    TestRegistry::new(vec![
        local(broker, "0001_loopback_order", single_partition_order),
        local(broker, "0002_loopback_multipartition", multi_partition),
        local(broker, "0003_loopback_shared_topic", shared_topic),
        local(broker, "0004_loopback_eof", eof_and_no_msgs),
        local(broker, "0005_loopback_delivery_errors", delivery_errors),
    ])
}

fn local(
    broker: &LoopbackBroker,
    name: &str,
    body: fn(&TestContext, &LoopbackBroker) -> TestResult,
) -> TestDescriptor {
    let broker = broker.clone();
    TestDescriptor::new(name, move |ctx| body(ctx, &broker)).with_flags(TestFlags::LOCAL)
}

fn single_partition_order(ctx: &TestContext, broker: &LoopbackBroker) -> TestResult {
    const MSGCNT: usize = 1000;

    let topic = ctx.topic_name("0001", true);
    broker.create_topic(&topic, 1)?;
    let run_id = ctx.new_run_id();

    let mut producer = broker.producer();
    produce_msgs(
        &mut producer,
        &ProduceBatch::new(&topic, run_id, 0, 0, MSGCNT),
        DELIVERY_TIMEOUT,
    )?;
    ctx.stats().write(&producer.stats_json())?;

    let mut consumer = broker.consumer(&[(topic.as_str(), 0)])?;
    let mut verifier = ctx.verifier(run_id);
    consume_msgs(
        &mut consumer,
        "consume",
        &mut verifier,
        None,
        Some(MSGCNT),
        POLL_TIMEOUT,
    )?;

    verifier.verify("consume", 0, MSGCNT, VerifyFlags::ALL)?;
    ctx.report_add(format!("{{\"msgs\": {}}}", verifier.msg_count()));
    Ok(())
}

fn multi_partition(ctx: &TestContext, broker: &LoopbackBroker) -> TestResult {
    const PARTITIONS: i32 = 4;
    const PER_PARTITION: usize = 250;

    let topic = ctx.topic_name("0002", true);
    broker.create_topic(&topic, PARTITIONS)?;
    let run_id = ctx.new_run_id();

    let mut producer = broker.producer();
    for partition in 0..PARTITIONS {
        let base = partition * PER_PARTITION as i32;
        produce_msgs(
            &mut producer,
            &ProduceBatch::new(&topic, run_id, partition, base, PER_PARTITION),
            DELIVERY_TIMEOUT,
        )?;
    }

    let total = PARTITIONS as usize * PER_PARTITION;
    let mut consumer = broker.subscribe(&topic)?;
    let mut verifier = ctx.verifier(run_id);
    consume_msgs(
        &mut consumer,
        "consume",
        &mut verifier,
        None,
        Some(total),
        POLL_TIMEOUT,
    )?;

    for partition in 0..PARTITIONS {
        verifier.verify_partition(
            "partition",
            &topic,
            partition,
            partition * PER_PARTITION as i32,
            PER_PARTITION,
            VerifyFlags::ORDER | VerifyFlags::DUP | VerifyFlags::BY_OFFSET | VerifyFlags::BY_MSGID,
        )?;
    }
    verifier.verify("all partitions", 0, total, VerifyFlags::ALL)?;
    Ok(())
}

/// Two runs write to one topic; a per-run verifier and a forwarded audit
/// verifier each see only their own run in the shared stream
fn shared_topic(ctx: &TestContext, broker: &LoopbackBroker) -> TestResult {
    const MSGCNT: usize = 200;

    let topic = ctx.topic_name("0003", true);
    broker.create_topic(&topic, 1)?;
    let mine = ctx.new_run_id();
    let other = ctx.new_run_id();
    if mine == other {
        return ctx.skip("run id collision");
    }

    let mut producer = broker.producer();
    for (run_id, base) in [(mine, 0), (other, 10_000), (mine, MSGCNT as i32)] {
        produce_msgs(
            &mut producer,
            &ProduceBatch::new(&topic, run_id, 0, base, MSGCNT),
            DELIVERY_TIMEOUT,
        )?;
    }

    let audit = MessageVerifier::new(other).into_shared();
    let mut verifier = ctx.verifier(mine);
    verifier.set_forward(audit.clone());

    let mut consumer = broker.consumer(&[(topic.as_str(), 0)])?;
    consume_msgs(
        &mut consumer,
        "shared",
        &mut verifier,
        Some(1),
        None,
        POLL_TIMEOUT,
    )?;

    verifier.verify(
        "own run",
        0,
        2 * MSGCNT,
        VerifyFlags::DUP | VerifyFlags::RANGE | VerifyFlags::BY_MSGID,
    )?;
    audit.lock().verify(
        "other run",
        10_000,
        MSGCNT,
        VerifyFlags::DUP | VerifyFlags::RANGE | VerifyFlags::BY_MSGID,
    )?;
    Ok(())
}

fn eof_and_no_msgs(ctx: &TestContext, broker: &LoopbackBroker) -> TestResult {
    const PARTITIONS: i32 = 3;

    let topic = ctx.topic_name("0004", true);
    broker.create_topic(&topic, PARTITIONS)?;
    let run_id = ctx.new_run_id();

    let mut consumer = broker.subscribe(&topic)?;
    let mut verifier = ctx.verifier(run_id);
    let msgs = consume_msgs(
        &mut consumer,
        "empty",
        &mut verifier,
        Some(PARTITIONS as usize),
        None,
        POLL_TIMEOUT,
    )?;
    if msgs != 0 {
        return Err(TestFailure::new(format!("Expected no messages, got {}", msgs)));
    }
    for partition in 0..PARTITIONS {
        if verifier.eof_offset(&topic, partition) != Some(0) {
            ctx.fail_later(format!("{} [{}]: no EOF at offset 0", topic, partition));
        }
    }

    let foreign = RunId::from_raw(run_id.as_u64().wrapping_add(1));
    let mut producer = broker.producer();
    produce_msgs(
        &mut producer,
        &ProduceBatch::new(&topic, foreign, -1, 0, 30),
        DELIVERY_TIMEOUT,
    )?;
    consume_no_msgs(&mut consumer, "foreign only", run_id, Duration::from_millis(200))?;
    Ok(())
}

fn delivery_errors(ctx: &TestContext, broker: &LoopbackBroker) -> TestResult {
    let topic = ctx.topic_name("0005", true);
    broker.create_topic(&topic, 1)?;
    let run_id = ctx.new_run_id();

    let mut producer = broker.producer();
    producer.fail_deliveries("Local: Message timed out");
    match produce_msgs(
        &mut producer,
        &ProduceBatch::new(&topic, run_id, 0, 0, 10),
        DELIVERY_TIMEOUT,
    ) {
        Err(TestFailure::Failed(reason)) if reason.contains("Message delivery failed") => Ok(()),
        Err(e) => Err(TestFailure::new(format!("Unexpected produce error: {}", e))),
        Ok(()) => Err(TestFailure::new("Failed delivery went unnoticed")),
    }
}
