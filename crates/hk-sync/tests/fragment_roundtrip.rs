//! Integration tests for the fragmented transfer path.
//!
//! Drives the real sender against a `MemoryLink`, then feeds the recorded
//! fragments into a `Reassembler` in various arrival orders.

use bytes::Bytes;
use hk_chunks::{compress, fragment_count, Fragment};
use hk_core::types::events;
use hk_core::PeerId;
use hk_sync::{
    send_payload_blocking, Assembly, MemoryLink, Reassembler, SendOutcome, TransferContext,
    TransferSettings,
};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use std::time::{Duration, Instant};

const TTL: Duration = Duration::from_secs(60);

fn seeded_payload(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}

fn send(settings: TransferSettings, payload: &[u8]) -> Vec<Bytes> {
    let ctx = TransferContext::new(settings);
    let link = MemoryLink::new(PeerId(1));
    let outcome = send_payload_blocking(&ctx, &link, events::PROFILE, payload).unwrap();
    assert!(matches!(outcome, SendOutcome::Completed { .. }), "got {outcome:?}");
    link.take_sent()
        .into_iter()
        .map(|(event, body)| {
            assert_eq!(event, events::PROFILE);
            body
        })
        .collect()
}

/// 900,000 incompressible bytes at 250,000 per fragment: the compressed
/// buffer is a little over 900,000 bytes, so four fragments. Reassembled in
/// reverse arrival order.
#[test]
fn large_payload_reverse_order() {
    let payload = seeded_payload(900_000, 42);
    let settings = TransferSettings {
        fragment_size: 250_000,
        ..TransferSettings::default()
    };

    let compressed_len = compress(&payload).unwrap().len();
    let expected = fragment_count(compressed_len, 250_000);
    assert_eq!(expected, 4);

    let bodies = send(settings.clone(), &payload);
    assert_eq!(bodies.len(), expected);

    let mut r = Reassembler::from_settings(&settings);
    let now = Instant::now();
    let mut result = None;
    for (i, body) in bodies.iter().rev().enumerate() {
        match r.accept_at(PeerId(1), body, now) {
            Assembly::Pending { received, total } => {
                assert_eq!(received as usize, i + 1);
                assert_eq!(total, 4);
            }
            Assembly::Complete(p) => result = Some(p),
            Assembly::Rejected(e) => panic!("rejected: {e}"),
        }
    }
    assert_eq!(result.as_deref(), Some(payload.as_slice()));
    assert_eq!(r.pending(), 0);
}

#[test]
fn empty_payload_is_one_empty_fragment() {
    let bodies = send(TransferSettings::default(), b"");
    assert_eq!(bodies.len(), 1);
    let f = Fragment::decode(&bodies[0]).unwrap();
    assert_eq!((f.index, f.total), (0, 1));
    assert!(f.data.is_empty());

    let mut r = Reassembler::new(TTL, usize::MAX);
    assert_eq!(r.accept(PeerId(1), &bodies[0]), Assembly::Complete(Vec::new()));
}

#[test]
fn duplicates_do_not_change_the_result() {
    let payload = seeded_payload(5_000, 7);
    let settings = TransferSettings {
        fragment_size: 1_000,
        ..TransferSettings::default()
    };
    let bodies = send(settings, &payload);
    assert!(bodies.len() >= 5);

    let mut r = Reassembler::new(TTL, usize::MAX);
    let now = Instant::now();
    // Every fragment but the last, twice
    for body in bodies[..bodies.len() - 1].iter().chain(&bodies[..bodies.len() - 1]) {
        assert!(matches!(r.accept_at(PeerId(1), body, now), Assembly::Pending { .. }));
    }
    assert_eq!(
        r.accept_at(PeerId(1), &bodies[bodies.len() - 1], now),
        Assembly::Complete(payload)
    );
}

/// A transfer that stalls past its TTL is evicted; the late fragment starts
/// a new transfer rather than completing the old one.
#[test]
fn stalled_transfer_is_evicted_and_restarts() {
    let payload = seeded_payload(3_000, 9);
    let settings = TransferSettings {
        fragment_size: 1_000,
        ..TransferSettings::default()
    };
    let bodies = send(settings, &payload);
    let total = bodies.len() as u32;
    assert!(total >= 3);

    let mut r = Reassembler::new(TTL, usize::MAX);
    let start = Instant::now();
    for body in &bodies[..bodies.len() - 1] {
        r.accept_at(PeerId(1), body, start);
    }
    assert_eq!(r.pending(), 1);

    let late = start + TTL + Duration::from_secs(1);
    assert_eq!(
        r.accept_at(PeerId(1), &bodies[bodies.len() - 1], late),
        Assembly::Pending { received: 1, total }
    );
    assert_eq!(r.pending(), 1);

    // Resending the rest inside the new window completes it
    let mut last = None;
    for body in &bodies[..bodies.len() - 1] {
        last = Some(r.accept_at(PeerId(1), body, late));
    }
    assert_eq!(last, Some(Assembly::Complete(payload)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_arrival_order_reassembles(
        payload in proptest::collection::vec(any::<u8>(), 0..4_096),
        fragment_size in 1usize..512,
        seed in any::<u64>(),
    ) {
        let settings = TransferSettings { fragment_size, ..TransferSettings::default() };
        let mut bodies = send(settings, &payload);
        bodies.shuffle(&mut StdRng::seed_from_u64(seed));

        let mut r = Reassembler::new(TTL, usize::MAX);
        let now = Instant::now();
        let mut done = None;
        for body in &bodies {
            if let Assembly::Complete(p) = r.accept_at(PeerId(1), body, now) {
                done = Some(p);
            }
        }
        prop_assert_eq!(done, Some(payload));
    }
}
