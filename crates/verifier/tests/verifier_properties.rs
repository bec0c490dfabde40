//! Verifier property tests
//!
//! Streams are generated the way a producer with a round-robin partitioner
//! would write them: message ids 0..n spread over the partitions, offsets
//! contiguous from zero within each partition.

use proptest::prelude::*;
use streamcheck_core::{Error, MessageToken, RunId};
use streamcheck_verifier::{MessageEvent, MessageVerifier, Scope, VerifyFlags, Violation};

const TOPIC: &str = "rdkafkatest_props";

/// (partition, offset, msg id) in produce order
fn round_robin(count: i32, partitions: i32) -> Vec<(i32, i64, i32)> {
    (0..count)
        .map(|id| (id % partitions, (id / partitions) as i64, id))
        .collect()
}

fn event(run: RunId, partition: i32, offset: i64, msg_id: i32) -> MessageEvent {
    let payload = MessageToken::new(run, partition, msg_id).encode();
    MessageEvent::message(TOPIC, partition, offset, payload)
}

fn ingest_all(v: &mut MessageVerifier, run: RunId, stream: &[(i32, i64, i32)]) {
    for &(partition, offset, msg_id) in stream {
        v.ingest(&event(run, partition, offset, msg_id)).unwrap();
    }
}

// ============================================================================
// Clean streams
// ============================================================================

proptest! {
    #[test]
    fn clean_stream_verifies(count in 1i32..400, partitions in 1i32..6) {
        let run = RunId::from_raw(1);
        let mut v = MessageVerifier::new(run);
        ingest_all(&mut v, run, &round_robin(count, partitions));

        let received = v.verify("clean", 0, count as usize, VerifyFlags::ALL).unwrap();
        prop_assert_eq!(received, count as usize);
        prop_assert!(v.violations().is_empty());
    }

    #[test]
    fn verify_is_idempotent(
        count in 2i32..200,
        partitions in 1i32..4,
        swap in any::<prop::sample::Index>(),
    ) {
        let run = RunId::from_raw(2);
        let mut stream = round_robin(count, partitions);
        // Reorder two neighbours so there is something to find
        let i = swap.index(stream.len() - 1);
        stream.swap(i, i + 1);

        let mut v = MessageVerifier::new(run);
        ingest_all(&mut v, run, &stream);

        let first = format!("{:?}", v.verify("twice", 0, count as usize, VerifyFlags::ALL));
        let second = format!("{:?}", v.verify("twice", 0, count as usize, VerifyFlags::ALL));
        prop_assert_eq!(first, second);
    }
}

// ============================================================================
// Injected faults
// ============================================================================

proptest! {
    #[test]
    fn injected_duplicate_is_found(
        count in 2i32..300,
        partitions in 1i32..5,
        pick in any::<prop::sample::Index>(),
    ) {
        let run = RunId::from_raw(3);
        let mut stream = round_robin(count, partitions);
        let dup = stream[pick.index(stream.len())];
        stream.push(dup);

        let mut v = MessageVerifier::new(run);
        ingest_all(&mut v, run, &stream);

        let by_id = v.verify_dup(Scope::All, VerifyFlags::DUP | VerifyFlags::BY_MSGID).unwrap();
        prop_assert_eq!(by_id, 1);

        let both = v
            .verify_dup(
                Scope::All,
                VerifyFlags::DUP | VerifyFlags::BY_MSGID | VerifyFlags::BY_OFFSET,
            )
            .unwrap();
        prop_assert_eq!(both, 2);
    }

    #[test]
    fn removed_message_is_reported_as_gap(
        count in 3i32..300,
        partitions in 1i32..5,
        pick in any::<prop::sample::Index>(),
    ) {
        let run = RunId::from_raw(4);
        // Never the first or last id, so the gap has in-range neighbours
        let missing = 1 + pick.index(count as usize - 2) as i32;
        let stream: Vec<_> = round_robin(count, partitions)
            .into_iter()
            .filter(|&(_, _, id)| id != missing)
            .collect();

        let mut v = MessageVerifier::new(run);
        ingest_all(&mut v, run, &stream);

        let fails = v
            .verify_range(Scope::All, VerifyFlags::BY_MSGID, 0, count as i64 - 1)
            .unwrap();
        prop_assert_eq!(fails, 2);

        let gap = v.violations().iter().find_map(|violation| match violation {
            Violation::RangeGap { first, last, missing, .. } => Some((*first, *last, *missing)),
            _ => None,
        });
        prop_assert_eq!(gap, Some((missing as i64, missing as i64, 1)));

        let result = v.verify("gap", 0, count as usize, VerifyFlags::RANGE | VerifyFlags::BY_MSGID);
        let is_verification_failure = matches!(result, Err(Error::VerificationFailed { .. }));
        prop_assert!(is_verification_failure);
    }
}

// ============================================================================
// Shared namespaces
// ============================================================================

proptest! {
    #[test]
    fn runs_sharing_a_topic_partition_the_stream(
        owners in proptest::collection::vec(0u8..3, 1..300),
    ) {
        let run_a = RunId::from_raw(10);
        let run_b = RunId::from_raw(11);
        let foreign = RunId::from_raw(12);
        let mut a = MessageVerifier::new(run_a);
        let mut b = MessageVerifier::new(run_b);

        for (offset, &owner) in owners.iter().enumerate() {
            let run_id = match owner {
                0 => run_a,
                1 => run_b,
                _ => foreign,
            };
            let ev = event(run_id, 0, offset as i64, offset as i32);
            let accepted_a = a.ingest(&ev).unwrap();
            let accepted_b = b.ingest(&ev).unwrap();
            prop_assert_eq!(accepted_a, owner == 0);
            prop_assert_eq!(accepted_b, owner == 1);
        }

        let expected_a = owners.iter().filter(|&&o| o == 0).count();
        let expected_b = owners.iter().filter(|&&o| o == 1).count();
        prop_assert_eq!(a.msg_count(), expected_a);
        prop_assert_eq!(b.msg_count(), expected_b);
    }
}

#[test]
fn forward_target_audits_every_run() {
    let run_a = RunId::from_raw(20);
    let run_b = RunId::from_raw(21);

    let audit = MessageVerifier::new(run_b).into_shared();
    let mut per_test = MessageVerifier::new(run_a);
    per_test.set_forward(audit.clone());

    for offset in 0..10i64 {
        let owner = if offset % 2 == 0 { run_a } else { run_b };
        per_test.ingest(&event(owner, 0, offset, offset as i32)).unwrap();
    }

    assert_eq!(per_test.msg_count(), 5);
    assert_eq!(audit.lock().msg_count(), 5);
    assert_eq!(audit.lock().partition_count(), 1);
}
