//! Transport seam.
//!
//! Everything above this module talks to a peer through `PeerLink`: named
//! message sends, the queue depth used for backpressure, and whether the
//! peer is still connected. `hkd` implements it over TCP; `MemoryLink` records traffic for
//! tests and in-process use.

use bytes::Bytes;
use hk_core::types::events;
use hk_core::{DisconnectCode, PeerId};
use std::sync::{Arc, Mutex, PoisonError};

pub trait PeerLink {
    fn peer_id(&self) -> PeerId;

    /// Messages queued for this peer and not yet handed to the socket.
    fn send_queue_depth(&self) -> usize;

    fn is_connected(&self) -> bool;

    fn send(&self, event: &str, body: Bytes);

    fn disconnect(&self);

    /// Tell the peer why, then drop it.
    fn disconnect_with(&self, code: DisconnectCode) {
        self.send(events::ERROR, code.encode());
        self.disconnect();
    }
}

impl<L: PeerLink + ?Sized> PeerLink for Arc<L> {
    fn peer_id(&self) -> PeerId {
        (**self).peer_id()
    }

    fn send_queue_depth(&self) -> usize {
        (**self).send_queue_depth()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn send(&self, event: &str, body: Bytes) {
        (**self).send(event, body)
    }

    fn disconnect(&self) {
        (**self).disconnect()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    sent: Vec<(String, Bytes)>,
    queue_depth: usize,
    disconnected: bool,
}

/// In-memory link. Clones share state, so a test can keep one handle and
/// give the other to the code under test.
#[derive(Debug, Clone)]
pub struct MemoryLink {
    peer: PeerId,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLink {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.with_state(|s| s.queue_depth = depth);
    }

    pub fn set_connected(&self, connected: bool) {
        self.with_state(|s| s.disconnected = !connected);
    }

    /// Drain everything sent so far.
    pub fn take_sent(&self) -> Vec<(String, Bytes)> {
        self.with_state(|s| std::mem::take(&mut s.sent))
    }

    pub fn sent_count(&self) -> usize {
        self.with_state(|s| s.sent.len())
    }
}

impl PeerLink for MemoryLink {
    fn peer_id(&self) -> PeerId {
        self.peer
    }

    fn send_queue_depth(&self) -> usize {
        self.with_state(|s| s.queue_depth)
    }

    fn is_connected(&self) -> bool {
        self.with_state(|s| !s.disconnected)
    }

    fn send(&self, event: &str, body: Bytes) {
        self.with_state(|s| s.sent.push((event.to_string(), body)));
    }

    fn disconnect(&self) {
        self.with_state(|s| s.disconnected = true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_with_sends_code_first() {
        let link = MemoryLink::new(PeerId(4));
        link.disconnect_with(DisconnectCode::Maintenance);
        assert!(!link.is_connected());
        let sent = link.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, events::ERROR);
        assert_eq!(DisconnectCode::decode(&sent[0].1).unwrap(), DisconnectCode::Maintenance);
    }

    #[test]
    fn clones_share_state() {
        let link = MemoryLink::new(PeerId(1));
        let handle = link.clone();
        link.send("e", Bytes::from_static(b"x"));
        handle.set_queue_depth(7);
        assert_eq!(handle.sent_count(), 1);
        assert_eq!(link.send_queue_depth(), 7);
    }
}
