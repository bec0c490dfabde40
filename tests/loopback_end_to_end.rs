//! End-to-end: concurrent tests sharing loopback topics, verification
//! outcomes flowing into the run summary and the JSON report.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use streamcheck::{
    consume_msgs, produce_msgs, Error, Harness, HarnessConfig, LoopbackBroker, MessageToken,
    ProduceBatch, Producer, TestDescriptor, TestFailure, TestFlags, TestRegistry, TestState,
    VerifyFlags, Violation,
};
use tempfile::TempDir;

const POLL: Duration = Duration::from_secs(5);

fn config() -> HarnessConfig {
    HarnessConfig {
        concurrency: 4,
        poll_interval_ms: 10,
        seed: Some(42),
        ..HarnessConfig::default()
    }
}

/// Test that produces `count` messages of its own run into the shared
/// topic and verifies only those come back
fn shared_topic_test(name: &str, broker: &LoopbackBroker, count: usize) -> TestDescriptor {
    let broker = broker.clone();
    TestDescriptor::new(name, move |ctx| {
        let run_id = ctx.new_run_id();
        let mut producer = broker.producer();
        produce_msgs(
            &mut producer,
            &ProduceBatch::new("shared", run_id, 0, 0, count),
            POLL,
        )?;

        let mut consumer = broker.consumer(&[("shared", 0)])?;
        let mut verifier = ctx.verifier(run_id);
        consume_msgs(&mut consumer, ctx.name(), &mut verifier, None, Some(count), POLL)?;
        verifier.verify(
            ctx.name(),
            0,
            count,
            VerifyFlags::DUP | VerifyFlags::RANGE | VerifyFlags::BY_MSGID,
        )?;
        ctx.report_add(format!("{{\"run_id\": {}, \"msgs\": {}}}", run_id, count));
        Ok(())
    })
    .with_flags(TestFlags::LOCAL)
}

#[test]
fn test_concurrent_runs_share_a_topic() {
    let broker = LoopbackBroker::new();
    broker.create_topic("shared", 1).unwrap();

    let tests = (1..=6)
        .map(|i| shared_topic_test(&format!("{:04}_shared", i), &broker, 100 * i))
        .collect();
    let harness = Harness::new(TestRegistry::new(tests), config())
        .unwrap()
        .with_client(Arc::new(broker.clone()));

    let summary = harness.run().unwrap();
    assert_eq!(summary.tests_passed, 6, "{}", summary.render(false));
    assert!(harness.wait_exit(Duration::from_secs(1)));
    assert_eq!(broker.log_len("shared", 0), Some(100 * (1 + 2 + 3 + 4 + 5 + 6)));

    let report = &summary.test("0003_shared").unwrap().report;
    assert_eq!(report[0]["msgs"], 300);
}

#[test]
fn test_duplicate_delivery_fails_the_test() {
    let broker = LoopbackBroker::new();
    broker.create_topic("dups", 1).unwrap();
    let violations = Arc::new(Mutex::new(Vec::new()));

    let seen = Arc::clone(&violations);
    let b = broker.clone();
    let dup_test = TestDescriptor::new("0001_dup", move |ctx| {
        let run_id = ctx.new_run_id();
        let mut producer = b.producer();
        produce_msgs(&mut producer, &ProduceBatch::new("dups", run_id, 0, 0, 10), POLL)?;
        // Redeliver message 5
        producer.produce("dups", 0, MessageToken::new(run_id, 0, 5).encode())?;
        producer.poll_deliveries(POLL);

        let mut consumer = b.consumer(&[("dups", 0)])?;
        let mut verifier = ctx.verifier(run_id);
        consume_msgs(&mut consumer, "dups", &mut verifier, Some(1), None, POLL)?;
        let result = verifier.verify("dups", 0, 10, VerifyFlags::ALL);
        seen.lock().extend(verifier.violations().iter().cloned());
        result?;
        Ok(())
    });

    let harness = Harness::new(TestRegistry::new(vec![dup_test]), config()).unwrap();
    let summary = harness.run().unwrap();

    let test = summary.test("0001_dup").unwrap();
    assert_eq!(test.state, TestState::Failed);
    assert!(test.failures[0].contains("dups"), "{:?}", test.failures);
    assert_eq!(summary.exit_code(), 1);

    let violations = violations.lock();
    assert!(violations
        .iter()
        .any(|v| matches!(v, Violation::Duplicate { .. })));
    assert!(violations
        .iter()
        .any(|v| matches!(v, Violation::CountMismatch { expected: 10, received: 11 })));
}

#[test]
fn test_verification_error_type_reaches_the_test() {
    let harness = Harness::new(
        TestRegistry::new(vec![TestDescriptor::new("0001_missing", |ctx| {
            let mut verifier = ctx.verifier(ctx.new_run_id());
            match verifier.verify("nothing received", 0, 5, VerifyFlags::ALL) {
                Err(Error::VerificationFailed { received, expected, .. }) => {
                    assert_eq!(received, 0);
                    assert_eq!(expected, 5);
                    Ok(())
                }
                other => Err(TestFailure::new(format!("unexpected {:?}", other))),
            }
        })]),
        config(),
    )
    .unwrap();
    assert_eq!(harness.run().unwrap().tests_passed, 1);
}

#[test]
fn test_report_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let broker = LoopbackBroker::new();
    broker.create_topic("shared", 1).unwrap();

    let tests = vec![
        shared_topic_test("0001_shared", &broker, 10),
        TestDescriptor::new("0002_remote", |_ctx| Ok(())),
    ];
    let cfg = HarnessConfig {
        required_flags: TestFlags::LOCAL,
        report_path: Some(dir.path().join("report.json")),
        ..config()
    };
    let harness = Harness::new(TestRegistry::new(tests), cfg).unwrap();
    let summary = harness.run().unwrap();

    let path = harness.config().report_path.clone().unwrap();
    summary.write_json(&path).unwrap();

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["tests"][0]["name"], "<MAIN>");
    assert_eq!(value["tests"][1]["state"], "PASSED");
    assert_eq!(value["tests"][1]["report"][0]["msgs"], 10);
    assert_eq!(value["tests"][2]["state"], "SKIPPED");
    assert_eq!(value["tests_run"], 1);
    assert_eq!(value["mode"], "bare");
}
