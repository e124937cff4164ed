use hk_core::config::TransferConfig;
use hk_core::PeerId;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Tunables for both directions of a transfer.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub fragment_size: usize,
    pub max_send_queue: usize,
    pub send_timeout: Duration,
    pub poll_interval: Duration,
    pub reassembly_ttl: Duration,
    pub max_payload_bytes: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from(&TransferConfig::default())
    }
}

impl From<&TransferConfig> for TransferSettings {
    fn from(cfg: &TransferConfig) -> Self {
        Self {
            fragment_size: cfg.fragment_size,
            max_send_queue: cfg.max_send_queue,
            send_timeout: cfg.send_timeout(),
            poll_interval: cfg.poll_interval(),
            reassembly_ttl: cfg.reassembly_ttl(),
            max_payload_bytes: cfg.max_payload_bytes,
        }
    }
}

/// State shared by every transfer a server or client instance starts.
#[derive(Debug)]
pub struct TransferContext {
    settings: TransferSettings,
    next_id: AtomicI64,
    in_flight: InFlight,
}

impl TransferContext {
    pub fn new(settings: TransferSettings) -> Self {
        Self {
            settings,
            next_id: AtomicI64::new(1),
            in_flight: InFlight::default(),
        }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Unique within this context.
    pub fn next_transfer_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }
}

/// Upload gate: at most one outbound transfer per (peer, event).
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    active: Arc<Mutex<HashSet<(PeerId, String)>>>,
}

impl InFlight {
    /// `None` when a transfer for the same peer and event is already running.
    pub fn try_acquire(&self, peer: PeerId, event: &str) -> Option<InFlightGuard> {
        let key = (peer, event.to_string());
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            active: Arc::clone(&self.active),
            key,
        })
    }

    pub fn is_active(&self, peer: PeerId, event: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.contains(&(peer, event.to_string()))
    }

    pub fn len(&self) -> usize {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases its slot on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    active: Arc<Mutex<HashSet<(PeerId, String)>>>,
    key: (PeerId, String),
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.remove(&self.key);
    }
}
