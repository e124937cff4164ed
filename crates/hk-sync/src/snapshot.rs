//! Last-known-good snapshots of the volatile profile sections.
//!
//! The client captures a snapshot periodically. The previous capture is
//! promoted to "last good" only while the server ping is healthy, so after a
//! connection drop the emergency save can roll back to state the server is
//! likely to have seen.

use hk_core::profile::{ItemStack, ProfileRecord};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub inventory: Vec<ItemStack>,
    pub known_stations: BTreeMap<String, i32>,
    pub known_texts: BTreeMap<String, String>,
}

impl PlayerSnapshot {
    pub fn capture(record: &ProfileRecord) -> Self {
        Self {
            inventory: record.sections.inventory.clone(),
            known_stations: record.sections.known_stations.clone(),
            known_texts: record.sections.known_texts.clone(),
        }
    }

    pub fn restore_into(&self, record: &mut ProfileRecord) {
        record.sections.inventory = self.inventory.clone();
        record.sections.known_stations = self.known_stations.clone();
        record.sections.known_texts = self.known_texts.clone();
    }
}

#[derive(Debug)]
pub struct SnapshotRing {
    ping_threshold: Duration,
    last: Option<PlayerSnapshot>,
    newest: Option<PlayerSnapshot>,
}

impl SnapshotRing {
    pub fn new(ping_threshold: Duration) -> Self {
        Self {
            ping_threshold,
            last: None,
            newest: None,
        }
    }

    pub fn record(&mut self, record: &ProfileRecord, server_ping: Duration) {
        if server_ping < self.ping_threshold {
            self.last = self.newest.take();
        }
        self.newest = Some(PlayerSnapshot::capture(record));
    }

    pub fn last_good(&self) -> Option<&PlayerSnapshot> {
        self.last.as_ref()
    }

    pub fn clear(&mut self) {
        self.last = None;
        self.newest = None;
    }
}
