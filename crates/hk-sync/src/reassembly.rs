//! Inbound fragment cache.
//!
//! Partial transfers are keyed by `(peer, transfer_id)`. Each lives for a
//! fixed TTL from its first fragment; later fragments do not extend it.
//! Every `accept` sweeps expired entries first, so a fragment that arrives
//! after its transfer expired starts a fresh one.

use bytes::Bytes;
use hk_chunks::{decompress, join_fragments, Fragment};
use hk_core::PeerId;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::context::TransferSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembly {
    Pending { received: u32, total: u32 },
    /// The decompressed payload
    Complete(Vec<u8>),
    /// Fragment or payload dropped; the connection stays up
    Rejected(String),
}

#[derive(Debug)]
struct PartialTransfer {
    parts: BTreeMap<u32, Bytes>,
    total: u32,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct Reassembler {
    ttl: Duration,
    max_payload_bytes: usize,
    partial: HashMap<(PeerId, i64), PartialTransfer>,
}

impl Reassembler {
    pub fn new(ttl: Duration, max_payload_bytes: usize) -> Self {
        Self {
            ttl,
            max_payload_bytes,
            partial: HashMap::new(),
        }
    }

    pub fn from_settings(settings: &TransferSettings) -> Self {
        Self::new(settings.reassembly_ttl, settings.max_payload_bytes)
    }

    pub fn accept(&mut self, peer: PeerId, body: &[u8]) -> Assembly {
        self.accept_at(peer, body, Instant::now())
    }

    pub fn accept_at(&mut self, peer: PeerId, body: &[u8], now: Instant) -> Assembly {
        self.sweep_at(now);

        let fragment = match Fragment::decode(body) {
            Ok(f) => f,
            Err(e) => {
                warn!(peer = %peer, "dropping malformed fragment: {e}");
                return Assembly::Rejected(e.to_string());
            }
        };

        let key = (peer, fragment.transfer_id);
        let ttl = self.ttl;
        let transfer = self.partial.entry(key).or_insert_with(|| PartialTransfer {
            parts: BTreeMap::new(),
            total: fragment.total,
            expires_at: now.checked_add(ttl).unwrap_or(now),
        });

        if transfer.total != fragment.total {
            warn!(
                peer = %peer,
                transfer_id = fragment.transfer_id,
                expected = transfer.total,
                got = fragment.total,
                "dropping fragment with inconsistent total"
            );
            return Assembly::Rejected(format!(
                "fragment total {} does not match transfer total {}",
                fragment.total, transfer.total
            ));
        }

        transfer.parts.insert(fragment.index, fragment.data);
        let received = transfer.parts.len() as u32;
        let total = transfer.total;
        if received < total {
            debug!(
                peer = %peer,
                transfer_id = fragment.transfer_id,
                received,
                total,
                "incomplete, waiting"
            );
            return Assembly::Pending { received, total };
        }

        let Some(done) = self.partial.remove(&key) else {
            return Assembly::Rejected("transfer vanished".into());
        };
        let compressed = join_fragments(done.parts.values().map(|b| b.as_ref()));
        match decompress(&compressed, self.max_payload_bytes) {
            Ok(payload) => {
                debug!(
                    peer = %peer,
                    transfer_id = fragment.transfer_id,
                    fragments = total,
                    bytes = payload.len(),
                    "transfer reassembled"
                );
                Assembly::Complete(payload)
            }
            Err(e) => {
                warn!(
                    peer = %peer,
                    transfer_id = fragment.transfer_id,
                    "dropping undecodable payload: {e:#}"
                );
                Assembly::Rejected(format!("{e:#}"))
            }
        }
    }

    /// Drop transfers whose TTL has passed. Returns how many were dropped.
    pub fn sweep_at(&mut self, now: Instant) -> usize {
        let before = self.partial.len();
        self.partial.retain(|(peer, transfer_id), t| {
            let keep = now <= t.expires_at;
            if !keep {
                debug!(
                    peer = %peer,
                    transfer_id,
                    received = t.parts.len(),
                    total = t.total,
                    "evicting expired transfer"
                );
            }
            keep
        });
        before - self.partial.len()
    }

    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Drop every partial transfer from `peer`.
    pub fn forget_peer(&mut self, peer: PeerId) -> usize {
        let before = self.partial.len();
        self.partial.retain(|(p, _), _| *p != peer);
        before - self.partial.len()
    }

    pub fn pending(&self) -> usize {
        self.partial.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hk_chunks::{compress, split_fragments};

    const TTL: Duration = Duration::from_secs(60);

    fn wire(transfer_id: i64, payload: &[u8], fragment_size: usize) -> Vec<Bytes> {
        let compressed = Bytes::from(compress(payload).unwrap());
        split_fragments(transfer_id, compressed, fragment_size)
            .unwrap()
            .iter()
            .map(|f| f.encode().unwrap())
            .collect()
    }

    fn payload() -> Vec<u8> {
        (0..2_000u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 11) as u8).collect()
    }

    #[test]
    fn out_of_order_completes() {
        let mut r = Reassembler::new(TTL, usize::MAX);
        let msgs = wire(1, &payload(), 300);
        let now = Instant::now();
        let n = msgs.len();
        for (i, m) in msgs.iter().rev().enumerate() {
            let got = r.accept_at(PeerId(1), m, now);
            if i + 1 < n {
                assert_eq!(got, Assembly::Pending { received: i as u32 + 1, total: n as u32 });
            } else {
                assert_eq!(got, Assembly::Complete(payload()));
            }
        }
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn duplicates_do_not_count_twice() {
        let mut r = Reassembler::new(TTL, usize::MAX);
        let msgs = wire(1, &payload(), 300);
        let now = Instant::now();
        assert!(msgs.len() >= 3);
        r.accept_at(PeerId(1), &msgs[0], now);
        let again = r.accept_at(PeerId(1), &msgs[0], now);
        assert_eq!(again, Assembly::Pending { received: 1, total: msgs.len() as u32 });

        let mut last = again;
        for m in &msgs[1..] {
            last = r.accept_at(PeerId(1), m, now);
        }
        assert_eq!(last, Assembly::Complete(payload()));
    }

    #[test]
    fn peers_do_not_mix() {
        let mut r = Reassembler::new(TTL, usize::MAX);
        let a = wire(5, b"alpha alpha alpha", 2);
        let b = wire(5, b"bravo bravo bravo", 2);
        let now = Instant::now();
        for m in &a[..a.len() - 1] {
            r.accept_at(PeerId(1), m, now);
        }
        for m in &b[..b.len() - 1] {
            r.accept_at(PeerId(2), m, now);
        }
        assert_eq!(r.pending(), 2);
        assert_eq!(
            r.accept_at(PeerId(2), &b[b.len() - 1], now),
            Assembly::Complete(b"bravo bravo bravo".to_vec())
        );
        assert_eq!(r.pending(), 1);
    }

    #[test]
    fn ttl_is_anchored_to_first_fragment() {
        let mut r = Reassembler::new(TTL, usize::MAX);
        let msgs = wire(1, &payload(), 300);
        let start = Instant::now();
        r.accept_at(PeerId(1), &msgs[0], start);
        // A second fragment late in the window does not extend it
        r.accept_at(PeerId(1), &msgs[1], start + Duration::from_secs(59));
        // Exactly at expiry the transfer is still live
        assert_eq!(r.sweep_at(start + TTL), 0);

        let late = r.accept_at(PeerId(1), &msgs[2], start + TTL + Duration::from_millis(1));
        // Evicted, so this starts a fresh transfer with one fragment
        assert_eq!(late, Assembly::Pending { received: 1, total: msgs.len() as u32 });
    }

    #[test]
    fn sweep_reports_evictions() {
        let mut r = Reassembler::new(TTL, usize::MAX);
        let msgs = wire(1, &payload(), 300);
        let start = Instant::now();
        r.accept_at(PeerId(1), &msgs[0], start);
        assert_eq!(r.sweep_at(start + TTL + Duration::from_secs(1)), 1);
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn inconsistent_total_is_rejected_and_transfer_kept() {
        let mut r = Reassembler::new(TTL, usize::MAX);
        let now = Instant::now();
        let first = Fragment { transfer_id: 3, index: 0, total: 3, data: Bytes::from_static(b"a") };
        let liar = Fragment { transfer_id: 3, index: 1, total: 2, data: Bytes::from_static(b"b") };
        r.accept_at(PeerId(1), &first.encode().unwrap(), now);
        assert!(matches!(
            r.accept_at(PeerId(1), &liar.encode().unwrap(), now),
            Assembly::Rejected(_)
        ));
        assert_eq!(r.pending(), 1);
    }

    #[test]
    fn malformed_fragment_is_rejected() {
        let mut r = Reassembler::new(TTL, usize::MAX);
        assert!(matches!(r.accept(PeerId(1), b"\x01\x02"), Assembly::Rejected(_)));
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn undecodable_payload_is_rejected() {
        let mut r = Reassembler::new(TTL, usize::MAX);
        let f = Fragment { transfer_id: 1, index: 0, total: 1, data: Bytes::from_static(&[0xff; 8]) };
        assert!(matches!(r.accept(PeerId(1), &f.encode().unwrap()), Assembly::Rejected(_)));
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut r = Reassembler::new(TTL, 100);
        let msgs = wire(1, &[0u8; 101], 1024);
        assert!(matches!(r.accept(PeerId(1), &msgs[0]), Assembly::Rejected(_)));
    }

    #[test]
    fn forget_peer_drops_only_that_peer() {
        let mut r = Reassembler::new(TTL, usize::MAX);
        let msgs = wire(1, &payload(), 300);
        r.accept(PeerId(1), &msgs[0]);
        r.accept(PeerId(2), &msgs[0]);
        assert_eq!(r.forget_peer(PeerId(1)), 1);
        assert_eq!(r.pending(), 1);
    }
}
