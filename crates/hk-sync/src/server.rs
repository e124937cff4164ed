//! Server side of a profile session.
//!
//! `ProfileServer` is transport-free: every handler takes an already
//! received message and returns the `ServerAction`s the host must carry
//! out. `hkd` executes them over TCP; tests execute them against
//! `MemoryLink`s.
//!
//! Session flow for one peer:
//!
//! 1. connect: maintenance gate, then a freshly issued key exchange and the
//!    server's player template, if one is configured
//! 2. hello: protocol and name checks, then the stored profile (or an
//!    empty payload for a new character) as a fragmented transfer
//! 3. fragmented uploads: full profile saves, inventory pushes, and
//!    emergency backup offers

use bytes::Bytes;
use hk_core::config::ServerConfig;
use hk_core::profile::{decode_inventory, PlayerTemplate, ProfileRecord};
use hk_core::types::{events, Hello, PROTOCOL_VERSION};
use hk_core::{is_forbidden_name, DisconnectCode, HkResult, PeerId};
use hk_crypto::{BackupOffer, BackupVerifier, KeyIssuer, RejectReason, Verdict};
use hk_store::ProfileStore;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::context::TransferSettings;
use crate::reassembly::{Assembly, Reassembler};

#[derive(Debug, Clone, PartialEq)]
pub enum ServerAction {
    /// Direct (unfragmented) message
    Send {
        peer: PeerId,
        event: &'static str,
        body: Bytes,
    },
    /// Compress, fragment, and send with backpressure
    Transfer {
        peer: PeerId,
        event: &'static str,
        payload: Vec<u8>,
    },
    /// Send the code, then drop the peer
    Disconnect { peer: PeerId, code: DisconnectCode },
    /// A fragmented upload was reassembled
    PayloadReceived { peer: PeerId, event: &'static str },
    BackupVerdict { peer: PeerId, verdict: Verdict },
}

#[derive(Debug)]
struct PeerSession {
    identity: String,
    character: Option<String>,
}

/// One connected peer, as reported to the admin service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer: PeerId,
    pub identity: String,
    pub character: Option<String>,
}

pub struct ProfileServer {
    store: ProfileStore,
    issuer: KeyIssuer,
    reassembler: Reassembler,
    sessions: HashMap<PeerId, PeerSession>,
    maintenance: bool,
    admins: HashSet<String>,
    /// Encoded template body, sent to every accepted peer
    template: Option<Bytes>,
}

impl ProfileServer {
    pub fn new(
        store: ProfileStore,
        issuer: KeyIssuer,
        transfer: &TransferSettings,
        config: &ServerConfig,
    ) -> Self {
        Self {
            store,
            issuer,
            reassembler: Reassembler::from_settings(transfer),
            sessions: HashMap::new(),
            maintenance: config.maintenance,
            admins: config.admins.iter().cloned().collect(),
            template: None,
        }
    }

    /// Starting kit clients apply to brand-new characters.
    pub fn set_template(&mut self, template: Option<&PlayerTemplate>) -> HkResult<()> {
        self.template = template.map(PlayerTemplate::encode).transpose()?;
        Ok(())
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    pub fn is_maintenance(&self) -> bool {
        self.maintenance
    }

    /// Only affects new connections.
    pub fn set_maintenance(&mut self, enabled: bool) {
        if self.maintenance != enabled {
            info!(enabled, "maintenance mode changed");
        }
        self.maintenance = enabled;
    }

    pub fn is_admin(&self, identity: &str) -> bool {
        self.admins.contains(identity)
    }

    pub fn connected(&self) -> usize {
        self.sessions.len()
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .sessions
            .iter()
            .map(|(peer, s)| PeerInfo {
                peer: *peer,
                identity: s.identity.clone(),
                character: s.character.clone(),
            })
            .collect();
        peers.sort_by_key(|p| p.peer);
        peers
    }

    /// Every connected peer logged in as `identity`.
    pub fn peers_for_identity(&self, identity: &str) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.identity == identity)
            .map(|(peer, _)| *peer)
            .collect();
        peers.sort();
        peers
    }

    pub fn pending_transfers(&self) -> usize {
        self.reassembler.pending()
    }

    pub fn on_connect(&mut self, peer: PeerId, identity: &str) -> Vec<ServerAction> {
        if self.maintenance && !self.is_admin(identity) {
            info!(peer = %peer, identity, "refusing connection during maintenance");
            return vec![ServerAction::Disconnect {
                peer,
                code: DisconnectCode::Maintenance,
            }];
        }

        let exchange = self.issuer.issue();
        let body = match exchange.encode() {
            Ok(b) => b,
            Err(e) => {
                error!(peer = %peer, "encoding key exchange: {e}");
                return vec![ServerAction::Disconnect {
                    peer,
                    code: DisconnectCode::ConnectFailed,
                }];
            }
        };
        self.sessions.insert(
            peer,
            PeerSession {
                identity: identity.to_string(),
                character: None,
            },
        );
        debug!(peer = %peer, identity, timestamp = exchange.timestamp, "session key issued");
        let mut actions = vec![ServerAction::Send {
            peer,
            event: events::KEY_EXCHANGE,
            body,
        }];
        if let Some(template) = &self.template {
            actions.push(ServerAction::Send {
                peer,
                event: events::TEMPLATE,
                body: template.clone(),
            });
        }
        actions
    }

    pub fn on_disconnect(&mut self, peer: PeerId) {
        let dropped = self.reassembler.forget_peer(peer);
        if let Some(session) = self.sessions.remove(&peer) {
            debug!(
                peer = %peer,
                identity = %session.identity,
                dropped_transfers = dropped,
                "peer session closed"
            );
        }
    }

    /// Evict expired partial uploads.
    pub fn sweep(&mut self, now: Instant) -> usize {
        self.reassembler.sweep_at(now)
    }

    pub fn on_message(&mut self, peer: PeerId, event: &str, body: &[u8]) -> Vec<ServerAction> {
        self.on_message_at(peer, event, body, Instant::now())
    }

    pub fn on_message_at(
        &mut self,
        peer: PeerId,
        event: &str,
        body: &[u8],
        now: Instant,
    ) -> Vec<ServerAction> {
        if !self.sessions.contains_key(&peer) {
            debug!(peer = %peer, event, "ignoring message from peer without a session");
            return Vec::new();
        }

        match event {
            events::HELLO => self.on_hello(peer, body),
            events::PROFILE | events::INVENTORY | events::SIGNATURE_CHECK => {
                match self.reassembler.accept_at(peer, body, now) {
                    Assembly::Complete(payload) => self.on_payload(peer, event, payload),
                    Assembly::Pending { .. } | Assembly::Rejected(_) => Vec::new(),
                }
            }
            _ => {
                debug!(peer = %peer, event, "ignoring unexpected event");
                Vec::new()
            }
        }
    }

    fn on_hello(&mut self, peer: PeerId, body: &[u8]) -> Vec<ServerAction> {
        let hello = match Hello::decode(body) {
            Ok(h) => h,
            Err(e) => {
                warn!(peer = %peer, "undecodable hello: {e}");
                return vec![ServerAction::Disconnect {
                    peer,
                    code: DisconnectCode::VersionMismatch,
                }];
            }
        };
        if hello.protocol_version != PROTOCOL_VERSION {
            warn!(
                peer = %peer,
                client = hello.protocol_version,
                server = PROTOCOL_VERSION,
                "protocol version mismatch"
            );
            return vec![ServerAction::Disconnect {
                peer,
                code: DisconnectCode::VersionMismatch,
            }];
        }
        if is_forbidden_name(&hello.character_name) {
            warn!(peer = %peer, name = %hello.character_name, "forbidden character name");
            return vec![ServerAction::Disconnect {
                peer,
                code: DisconnectCode::ForbiddenName,
            }];
        }

        let Some(session) = self.sessions.get_mut(&peer) else {
            return Vec::new();
        };
        session.character = Some(hello.character_name.clone());
        let identity = session.identity.clone();

        match self.store.load(&identity, &hello.character_name) {
            Ok(stored) => {
                let payload = stored.unwrap_or_default();
                info!(
                    peer = %peer,
                    identity = %identity,
                    name = %hello.character_name,
                    bytes = payload.len(),
                    "sending stored profile"
                );
                vec![ServerAction::Transfer {
                    peer,
                    event: events::PROFILE,
                    payload,
                }]
            }
            Err(e) => {
                error!(peer = %peer, identity = %identity, "loading profile: {e:#}");
                vec![ServerAction::Disconnect {
                    peer,
                    code: DisconnectCode::ConnectFailed,
                }]
            }
        }
    }

    fn on_payload(&mut self, peer: PeerId, event: &str, payload: Vec<u8>) -> Vec<ServerAction> {
        let Some(identity) = self.sessions.get(&peer).map(|s| s.identity.clone()) else {
            return Vec::new();
        };
        match event {
            events::PROFILE => self.on_profile(peer, &identity, payload),
            events::INVENTORY => self.on_inventory(peer, &identity, &payload),
            events::SIGNATURE_CHECK => self.on_backup_offer(peer, &identity, &payload),
            _ => Vec::new(),
        }
    }

    fn on_profile(&mut self, peer: PeerId, identity: &str, payload: Vec<u8>) -> Vec<ServerAction> {
        let record = match ProfileRecord::from_bytes(&payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(peer = %peer, identity, "dropping unparseable profile upload: {e}");
                return Vec::new();
            }
        };
        if is_forbidden_name(&record.player_name) {
            warn!(peer = %peer, identity, name = %record.player_name, "forbidden name in profile upload");
            return vec![ServerAction::Disconnect {
                peer,
                code: DisconnectCode::ForbiddenName,
            }];
        }

        let mut actions = vec![ServerAction::PayloadReceived {
            peer,
            event: events::PROFILE,
        }];
        if let Err(e) = self.store.save(identity, &record.player_name, &payload) {
            error!(peer = %peer, identity, "saving profile: {e:#}");
            actions.clear();
        }
        actions
    }

    fn on_inventory(&mut self, peer: PeerId, identity: &str, payload: &[u8]) -> Vec<ServerAction> {
        let Some(name) = self.sessions.get(&peer).and_then(|s| s.character.clone()) else {
            warn!(peer = %peer, identity, "inventory push before hello");
            return Vec::new();
        };
        let items = match decode_inventory(payload) {
            Ok(items) => items,
            Err(e) => {
                warn!(peer = %peer, identity, "dropping unparseable inventory: {e}");
                return Vec::new();
            }
        };

        let stored = match self.store.load(identity, &name) {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                warn!(peer = %peer, identity, name = %name, "inventory push for unknown profile");
                return Vec::new();
            }
            Err(e) => {
                error!(peer = %peer, identity, "loading profile: {e:#}");
                return Vec::new();
            }
        };
        let mut record = match ProfileRecord::from_bytes(&stored) {
            Ok(r) => r,
            Err(e) => {
                error!(peer = %peer, identity, "stored profile is unreadable: {e}");
                return Vec::new();
            }
        };
        record.replace_inventory(items);

        let saved = record
            .to_bytes()
            .map_err(anyhow::Error::from)
            .and_then(|bytes| self.store.save(identity, &name, &bytes));
        match saved {
            Ok(_) => vec![ServerAction::PayloadReceived {
                peer,
                event: events::INVENTORY,
            }],
            Err(e) => {
                error!(peer = %peer, identity, "saving inventory: {e:#}");
                Vec::new()
            }
        }
    }

    fn on_backup_offer(&mut self, peer: PeerId, identity: &str, payload: &[u8]) -> Vec<ServerAction> {
        let rejected = |reason| ServerAction::BackupVerdict {
            peer,
            verdict: Verdict::Rejected(reason),
        };

        let offer = match BackupOffer::decode(payload) {
            Ok(o) => o,
            Err(e) => {
                warn!(peer = %peer, identity, "malformed backup offer: {e}");
                return vec![rejected(RejectReason::Malformed)];
            }
        };
        let record = match ProfileRecord::from_bytes(&offer.payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(peer = %peer, identity, "backup offer carries an unparseable profile: {e}");
                return vec![rejected(RejectReason::Malformed)];
            }
        };
        if is_forbidden_name(&record.player_name) {
            warn!(peer = %peer, identity, name = %record.player_name, "forbidden name in backup offer");
            return vec![
                rejected(RejectReason::ForbiddenName),
                ServerAction::Disconnect {
                    peer,
                    code: DisconnectCode::ForbiddenName,
                },
            ];
        }

        let stored_modified = match self.store.last_write(identity, &record.player_name) {
            Ok(m) => m,
            Err(e) => {
                error!(peer = %peer, identity, "reading profile timestamp: {e:#}");
                return Vec::new();
            }
        };

        let verdict = BackupVerifier::new(&self.issuer).verify(
            &offer.payload,
            &offer.signature,
            stored_modified,
        );
        match verdict {
            Verdict::Accepted => {
                if let Err(e) = self.store.save(identity, &record.player_name, &offer.payload) {
                    error!(peer = %peer, identity, "saving accepted backup: {e:#}");
                    return Vec::new();
                }
                info!(
                    peer = %peer,
                    identity,
                    name = %record.player_name,
                    signed_at = offer.signature.timestamp,
                    "emergency backup accepted"
                );
            }
            Verdict::Rejected(reason) => {
                warn!(
                    peer = %peer,
                    identity,
                    name = %record.player_name,
                    reason = %reason,
                    "emergency backup rejected"
                );
            }
        }
        vec![ServerAction::BackupVerdict { peer, verdict }]
    }

    /// Operator message to one peer.
    pub fn message(&self, peer: PeerId, text: &str) -> Vec<ServerAction> {
        match hk_core::types::encode_text(text) {
            Ok(body) => vec![ServerAction::Send {
                peer,
                event: events::MESSAGE,
                body,
            }],
            Err(e) => {
                warn!(peer = %peer, "encoding message: {e}");
                Vec::new()
            }
        }
    }

    /// Tell the peer it is being kicked. The host force-disconnects it after
    /// the grace period if it has not left on its own.
    pub fn kick(&self, peer: PeerId, reason: &str) -> Vec<ServerAction> {
        match hk_core::types::encode_text(reason) {
            Ok(body) => vec![ServerAction::Send {
                peer,
                event: events::KICK_MESSAGE,
                body,
            }],
            Err(e) => {
                warn!(peer = %peer, "encoding kick message: {e}");
                vec![ServerAction::Disconnect {
                    peer,
                    code: DisconnectCode::Kicked,
                }]
            }
        }
    }
}

impl std::fmt::Debug for ProfileServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileServer")
            .field("dir", &self.store.dir())
            .field("sessions", &self.sessions.len())
            .field("pending", &self.reassembler.pending())
            .field("maintenance", &self.maintenance)
            .finish()
    }
}
