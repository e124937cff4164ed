//! Client side of a profile session.
//!
//! The host game feeds lifecycle signals in (connect, inbound messages,
//! logout, save) and gets decisions back. Uploads go through the shared
//! upload gate so a slow save never overlaps the next one for the same event.

use anyhow::Result;
use bytes::Bytes;
use hk_core::config::{expand_tilde, ClientConfig};
use hk_core::profile::{encode_inventory, ItemStack, PlayerTemplate, ProfileRecord};
use hk_core::types::{decode_text, events, ConnectionStatus, Hello};
use hk_core::{is_forbidden_name, DisconnectCode, HkResult, PeerId};
use hk_crypto::{sign_profile, KeyExchange};
use hk_store::EmergencyBackup;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::context::{TransferContext, TransferSettings};
use crate::link::PeerLink;
use crate::reassembly::{Assembly, Reassembler};
use crate::sender::{send_payload, send_payload_blocking, SendOutcome};
use crate::snapshot::SnapshotRing;

/// Shown when the server has no profile but the local one was already played.
pub const MUST_CREATE_NEW_CHARACTER: &str =
    "Please create a new character, before connecting to this server, to avoid loss of data.";

/// Shown when the server's stored profile cannot be used.
pub const CORRUPT_PROFILE: &str =
    "The saved data on the server was corrupt, please contact your server admin or create a new character.";

#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Directory holding the local character files
    pub backup_dir: PathBuf,
    /// Local character file name without extension
    pub file_stem: String,
    /// World the template spawn point is recorded for
    pub world: String,
    pub snapshot_ping_threshold: Duration,
}

impl ClientSettings {
    pub fn from_config(cfg: &ClientConfig, file_stem: &str, world: &str) -> Self {
        Self {
            backup_dir: expand_tilde(&cfg.backup_dir),
            file_stem: file_stem.to_string(),
            world: world.to_string(),
            snapshot_ping_threshold: Duration::from_millis(cfg.snapshot_ping_threshold_ms),
        }
    }
}

/// What the client should do with the profile the server sent.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileOutcome {
    /// Use the server's profile in place of the local one
    Loaded(ProfileRecord),
    /// Server has nothing; the local profile (with template applied) becomes
    /// the server character
    NewCharacter(ProfileRecord),
    /// Server has nothing but the local profile was already played: log out
    MustCreateNewCharacter,
    /// Server's profile is unreadable or has a forbidden name: log out
    Corrupt,
}

#[derive(Debug)]
pub struct ProfileClient {
    settings: ClientSettings,
    ctx: TransferContext,
    backup: EmergencyBackup,
    reassembler: Reassembler,
    snapshots: SnapshotRing,
    session: Option<KeyExchange>,
    /// Starting kit received from the server this session
    template: Option<PlayerTemplate>,
    server_character: bool,
    emergency_armed: bool,
    connection_error: Option<String>,
}

impl ProfileClient {
    pub fn new(settings: ClientSettings, transfer: TransferSettings) -> Self {
        let backup = EmergencyBackup::new(&settings.backup_dir, &settings.file_stem);
        Self {
            reassembler: Reassembler::from_settings(&transfer),
            snapshots: SnapshotRing::new(settings.snapshot_ping_threshold),
            ctx: TransferContext::new(transfer),
            backup,
            settings,
            session: None,
            template: None,
            server_character: false,
            emergency_armed: false,
            connection_error: None,
        }
    }

    pub fn backup(&self) -> &EmergencyBackup {
        &self.backup
    }

    pub fn is_server_character(&self) -> bool {
        self.server_character
    }

    pub fn is_emergency_armed(&self) -> bool {
        self.emergency_armed
    }

    pub fn has_session_key(&self) -> bool {
        self.session.is_some()
    }

    /// Offer any staged emergency backup, then send the hello. The offer goes
    /// out with the blocking driver so the server has ruled on it before it
    /// answers the hello with the stored profile.
    pub fn connect<L: PeerLink + ?Sized>(&self, link: &L, character_name: &str) -> Result<()> {
        if let Some(offer) = self.backup_offer()? {
            info!(
                backup = %self.backup.payload_path().display(),
                "found emergency backup, offering it to the server"
            );
            let outcome = send_payload_blocking(&self.ctx, link, events::SIGNATURE_CHECK, &offer)?;
            if !matches!(outcome, SendOutcome::Completed { .. }) {
                warn!(outcome = outcome.as_str(), "emergency backup offer did not complete");
            }
        }

        link.send(events::HELLO, Hello::new(character_name).encode()?);
        Ok(())
    }

    /// Encoded offer for the staged backup, if both files exist.
    pub fn backup_offer(&self) -> Result<Option<Bytes>> {
        match self.backup.load()? {
            Some(offer) => Ok(Some(offer.encode()?)),
            None => Ok(None),
        }
    }

    pub fn on_key_exchange(&mut self, body: &[u8]) -> HkResult<()> {
        let exchange = KeyExchange::decode(body)?;
        debug!(timestamp = exchange.timestamp, "received session key");
        self.session = Some(exchange);
        Ok(())
    }

    pub fn on_template(&mut self, body: &[u8]) -> HkResult<()> {
        let template = PlayerTemplate::decode(body)?;
        debug!(
            items = template.items.len(),
            skills = template.skills.len(),
            "received player template"
        );
        self.template = Some(template);
        Ok(())
    }

    /// Record the disconnect reason for the connection-failed screen.
    pub fn on_error(&mut self, body: &[u8]) -> HkResult<DisconnectCode> {
        let code = DisconnectCode::decode(body)?;
        warn!(code = code as i32, "server closed the connection: {}", code.user_message());
        self.connection_error = Some(code.user_message().to_string());
        Ok(code)
    }

    /// Operator message for display.
    pub fn on_message(&mut self, body: &[u8]) -> HkResult<String> {
        decode_text(body)
    }

    pub fn on_kick_message(&mut self, body: &[u8]) -> HkResult<()> {
        let reason = decode_text(body)?;
        info!(reason = %reason, "kicked by the server");
        self.connection_error = Some(reason);
        Ok(())
    }

    pub fn take_connection_error(&mut self) -> Option<String> {
        self.connection_error.take()
    }

    /// Feed one fragment of the server's profile transfer. Returns the
    /// outcome once the transfer is complete.
    pub fn on_profile_fragment(
        &mut self,
        peer: PeerId,
        body: &[u8],
        local: &ProfileRecord,
    ) -> Option<ProfileOutcome> {
        match self.reassembler.accept(peer, body) {
            Assembly::Complete(payload) => Some(self.on_profile(local, &payload)),
            Assembly::Pending { .. } | Assembly::Rejected(_) => None,
        }
    }

    /// Decide what to do with the server's profile.
    pub fn on_profile(&mut self, local: &ProfileRecord, payload: &[u8]) -> ProfileOutcome {
        if payload.is_empty() {
            if local.has_world_data() {
                warn!(name = %local.player_name, "server has no profile for an already played character");
                self.connection_error = Some(MUST_CREATE_NEW_CHARACTER.to_string());
                return ProfileOutcome::MustCreateNewCharacter;
            }
            let mut record = local.clone();
            if let Some(template) = &self.template {
                template.apply(&mut record, &self.settings.world);
            }
            self.snapshots.clear();
            self.server_character = true;
            info!(name = %record.player_name, "new server character");
            return ProfileOutcome::NewCharacter(record);
        }

        let record = match ProfileRecord::from_bytes(payload) {
            Ok(r) if !is_forbidden_name(&r.player_name) => r,
            Ok(r) => {
                warn!(name = %r.player_name, "server profile has a forbidden name");
                self.connection_error = Some(CORRUPT_PROFILE.to_string());
                return ProfileOutcome::Corrupt;
            }
            Err(e) => {
                warn!("server profile is unreadable: {e}");
                self.connection_error = Some(CORRUPT_PROFILE.to_string());
                return ProfileOutcome::Corrupt;
            }
        };

        // Snapshots of whatever was played before must not roll back into
        // this character.
        self.snapshots.clear();
        self.server_character = true;
        if self.backup.is_pending() {
            match self.backup.clear() {
                Ok(()) => info!(
                    backup = %self.backup.payload_path().display(),
                    "deleted emergency backup"
                ),
                Err(e) => warn!("removing emergency backup: {e:#}"),
            }
        }
        ProfileOutcome::Loaded(record)
    }

    /// Arm the emergency backup when the session ended without a clean
    /// server-side save.
    pub fn on_logout(&mut self, status: ConnectionStatus, shutting_down: bool) {
        self.emergency_armed = !matches!(
            status,
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        ) && !shutting_down;
        if self.emergency_armed {
            info!("lost connection to the server, preparing emergency backup of profile data");
        }
    }

    pub fn record_snapshot(&mut self, record: &ProfileRecord, server_ping: Duration) {
        self.snapshots.record(record, server_ping);
    }

    /// Serialize `record` for saving. With the emergency flag armed, the
    /// volatile sections roll back to the last good snapshot first, and if a
    /// session key is held the result is signed and staged locally.
    pub fn prepare_save(&mut self, record: &mut ProfileRecord) -> Result<Vec<u8>> {
        let emergency = self.server_character && self.emergency_armed;
        if emergency {
            if let Some(snapshot) = self.snapshots.last_good() {
                snapshot.restore_into(record);
                debug!("restored last good snapshot before emergency save");
            }
        }

        let payload = record.to_bytes()?;

        if emergency {
            if let Some(session) = &self.session {
                let signature = sign_profile(&payload, &session.key, session.timestamp)?;
                self.backup.stage(&payload, &signature)?;
                self.emergency_armed = false;
            }
        }
        Ok(payload)
    }

    /// Upload a full profile. `None` when this is not a server character or
    /// an upload is already running.
    pub async fn upload_profile<L: PeerLink + ?Sized>(
        &self,
        link: &L,
        payload: &[u8],
    ) -> HkResult<Option<SendOutcome>> {
        self.upload(link, events::PROFILE, payload).await
    }

    /// Blocking upload for shutdown and server-initiated disconnects.
    pub fn upload_profile_blocking<L: PeerLink + ?Sized>(
        &self,
        link: &L,
        payload: &[u8],
    ) -> HkResult<Option<SendOutcome>> {
        if !self.server_character {
            return Ok(None);
        }
        let Some(_guard) = self.ctx.in_flight().try_acquire(link.peer_id(), events::PROFILE) else {
            debug!("profile upload already in flight, skipping");
            return Ok(None);
        };
        send_payload_blocking(&self.ctx, link, events::PROFILE, payload).map(Some)
    }

    pub async fn upload_inventory<L: PeerLink + ?Sized>(
        &self,
        link: &L,
        items: &[ItemStack],
    ) -> HkResult<Option<SendOutcome>> {
        let payload = encode_inventory(items)?;
        self.upload(link, events::INVENTORY, &payload).await
    }

    async fn upload<L: PeerLink + ?Sized>(
        &self,
        link: &L,
        event: &str,
        payload: &[u8],
    ) -> HkResult<Option<SendOutcome>> {
        if !self.server_character {
            return Ok(None);
        }
        let Some(_guard) = self.ctx.in_flight().try_acquire(link.peer_id(), event) else {
            debug!(event, "upload already in flight, skipping");
            return Ok(None);
        };
        send_payload(&self.ctx, link, event, payload).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MemoryLink;
    use hk_core::profile::{Position, WorldData};
    use hk_crypto::{BackupOffer, KdfParams, KeyIssuer};
    use secrecy::SecretString;
    use tempfile::TempDir;

    fn client(dir: &TempDir) -> ProfileClient {
        let cfg = ClientConfig {
            backup_dir: dir.path().to_path_buf(),
            ..ClientConfig::default()
        };
        ProfileClient::new(
            ClientSettings::from_config(&cfg, "sigrid", "Midgard"),
            TransferSettings::default(),
        )
    }

    fn played() -> ProfileRecord {
        let mut r = ProfileRecord::new("Sigrid", 1);
        r.sections.world_data.insert("Midgard".into(), WorldData::default());
        r
    }

    fn wood(n: i32) -> ItemStack {
        ItemStack {
            name: "Wood".into(),
            stack: n,
            quality: 1,
            variant: 0,
        }
    }

    fn with_session(c: &mut ProfileClient) -> KeyIssuer {
        let issuer = KeyIssuer::new(SecretString::from("s"), KdfParams::default()).unwrap();
        c.on_key_exchange(&issuer.issue().encode().unwrap()).unwrap();
        issuer
    }

    #[test]
    fn empty_profile_with_world_data_must_create_new() {
        let dir = TempDir::new().unwrap();
        let mut c = client(&dir);
        assert_eq!(c.on_profile(&played(), b""), ProfileOutcome::MustCreateNewCharacter);
        assert!(!c.is_server_character());
        assert_eq!(c.take_connection_error().as_deref(), Some(MUST_CREATE_NEW_CHARACTER));
        assert!(c.take_connection_error().is_none());
    }

    #[test]
    fn settings_follow_client_config() {
        let cfg = ClientConfig {
            snapshot_ping_threshold_ms: 800,
            backup_dir: PathBuf::from("/srv/chars"),
        };
        let s = ClientSettings::from_config(&cfg, "sigrid", "Midgard");
        assert_eq!(s.snapshot_ping_threshold, Duration::from_millis(800));
        assert_eq!(s.backup_dir, PathBuf::from("/srv/chars"));
        assert_eq!(s.file_stem, "sigrid");
    }

    #[test]
    fn empty_profile_applies_template() {
        let dir = TempDir::new().unwrap();
        let mut c = client(&dir);
        let template = PlayerTemplate::from_toml_str(
            "items = { Torch = 1 }\nskills = { Run = 10.0 }\nspawn = { x = 1.0, y = 2.0, z = 3.0 }\n",
        )
        .unwrap();
        c.on_template(&template.encode().unwrap()).unwrap();
        assert!(c.on_template(b"not json").is_err());

        let ProfileOutcome::NewCharacter(record) = c.on_profile(&ProfileRecord::new("Sigrid", 1), b"") else {
            panic!("expected a new character");
        };
        assert!(c.is_server_character());
        assert_eq!(record.sections.inventory[0].name, "Torch");
        assert_eq!(record.sections.skills.get("Run"), Some(&10.0));
        assert_eq!(
            record.sections.world_data["Midgard"].spawn,
            Some(Position { x: 1.0, y: 2.0, z: 3.0 })
        );
    }

    #[test]
    fn corrupt_or_forbidden_profile_is_refused() {
        let dir = TempDir::new().unwrap();
        let mut c = client(&dir);
        assert_eq!(c.on_profile(&played(), b"{not json"), ProfileOutcome::Corrupt);
        let bad = ProfileRecord::new("No", 1).to_bytes().unwrap();
        assert_eq!(c.on_profile(&played(), &bad), ProfileOutcome::Corrupt);
        assert!(!c.is_server_character());
        assert_eq!(c.take_connection_error().as_deref(), Some(CORRUPT_PROFILE));
    }

    #[test]
    fn logout_arms_only_on_lost_connection() {
        let dir = TempDir::new().unwrap();
        let mut c = client(&dir);
        c.on_logout(ConnectionStatus::Connected, false);
        assert!(!c.is_emergency_armed());
        c.on_logout(ConnectionStatus::Connecting, false);
        assert!(!c.is_emergency_armed());
        c.on_logout(ConnectionStatus::Failed, true);
        assert!(!c.is_emergency_armed());
        c.on_logout(ConnectionStatus::Disconnected, false);
        assert!(c.is_emergency_armed());
    }

    #[test]
    fn emergency_save_restores_snapshot_signs_and_stages() {
        let dir = TempDir::new().unwrap();
        let mut c = client(&dir);
        let issuer = with_session(&mut c);
        c.on_profile(&played(), &played().to_bytes().unwrap());
        assert!(c.is_server_character());

        let mut record = played();
        record.replace_inventory(vec![wood(5)]);
        c.record_snapshot(&record, Duration::from_millis(50));
        record.replace_inventory(vec![wood(6)]);
        c.record_snapshot(&record, Duration::from_millis(50));

        // Items picked up while the connection was dying
        record.replace_inventory(vec![wood(500)]);
        c.on_logout(ConnectionStatus::Disconnected, false);
        let payload = c.prepare_save(&mut record).unwrap();

        assert_eq!(record.sections.inventory, vec![wood(5)]);
        assert!(!c.is_emergency_armed());
        assert!(c.backup().is_pending());

        let offer = BackupOffer::decode(&c.backup_offer().unwrap().unwrap()).unwrap();
        assert_eq!(offer.payload.as_ref(), payload.as_slice());
        let verdict = hk_crypto::BackupVerifier::new(&issuer).verify(&offer.payload, &offer.signature, None);
        assert!(verdict.is_accepted());
    }

    #[test]
    fn accepted_profile_drops_earlier_snapshots() {
        let dir = TempDir::new().unwrap();
        let mut c = client(&dir);
        with_session(&mut c);

        // Snapshots taken while playing another character
        let mut other = played();
        other.replace_inventory(vec![wood(77)]);
        c.record_snapshot(&other, Duration::from_millis(50));
        c.record_snapshot(&other, Duration::from_millis(50));

        c.on_profile(&played(), &played().to_bytes().unwrap());
        c.on_logout(ConnectionStatus::Disconnected, false);
        let mut record = played();
        record.replace_inventory(vec![wood(3)]);
        c.prepare_save(&mut record).unwrap();
        assert_eq!(record.sections.inventory, vec![wood(3)]);
    }

    #[test]
    fn armed_without_key_does_not_stage() {
        let dir = TempDir::new().unwrap();
        let mut c = client(&dir);
        c.on_profile(&played(), &played().to_bytes().unwrap());
        c.on_logout(ConnectionStatus::Failed, false);
        c.prepare_save(&mut played()).unwrap();
        assert!(!c.backup().is_pending());
        assert!(c.is_emergency_armed());
    }

    #[test]
    fn normal_save_does_not_stage() {
        let dir = TempDir::new().unwrap();
        let mut c = client(&dir);
        with_session(&mut c);
        c.on_profile(&played(), &played().to_bytes().unwrap());
        c.prepare_save(&mut played()).unwrap();
        assert!(!c.backup().is_pending());
    }

    #[test]
    fn successful_load_clears_staged_backup() {
        let dir = TempDir::new().unwrap();
        let mut c = client(&dir);
        with_session(&mut c);
        c.on_profile(&played(), &played().to_bytes().unwrap());
        c.on_logout(ConnectionStatus::Disconnected, false);
        c.prepare_save(&mut played()).unwrap();
        assert!(c.backup().is_pending());

        c.on_profile(&played(), &played().to_bytes().unwrap());
        assert!(!c.backup().is_pending());
    }

    #[test]
    fn connect_sends_backup_offer_then_hello() {
        let dir = TempDir::new().unwrap();
        let mut c = client(&dir);
        with_session(&mut c);
        c.on_profile(&played(), &played().to_bytes().unwrap());
        c.on_logout(ConnectionStatus::Disconnected, false);
        c.prepare_save(&mut played()).unwrap();

        let link = MemoryLink::new(PeerId(1));
        c.connect(&link, "Sigrid").unwrap();
        let mut sent = link.take_sent();
        assert!(sent.len() >= 2);
        let (event, body) = sent.pop().unwrap();
        assert_eq!(event, events::HELLO);
        assert_eq!(Hello::decode(&body).unwrap().character_name, "Sigrid");
        assert!(sent.iter().all(|(e, _)| e == events::SIGNATURE_CHECK));
    }

    #[test]
    fn connect_without_backup_sends_only_hello() {
        let dir = TempDir::new().unwrap();
        let c = client(&dir);
        let link = MemoryLink::new(PeerId(1));
        c.connect(&link, "Sigrid").unwrap();
        assert_eq!(link.sent_count(), 1);
    }

    #[test]
    fn error_and_kick_record_connection_error() {
        let dir = TempDir::new().unwrap();
        let mut c = client(&dir);
        let code = c.on_error(&DisconnectCode::Maintenance.encode()).unwrap();
        assert_eq!(code, DisconnectCode::Maintenance);
        assert_eq!(
            c.take_connection_error().as_deref(),
            Some(DisconnectCode::Maintenance.user_message())
        );

        c.on_kick_message(&hk_core::types::encode_text("be nice").unwrap()).unwrap();
        assert_eq!(c.take_connection_error().as_deref(), Some("be nice"));
    }

    #[test]
    fn uploads_require_server_character() {
        let dir = TempDir::new().unwrap();
        let c = client(&dir);
        let link = MemoryLink::new(PeerId(1));
        assert_eq!(c.upload_profile_blocking(&link, b"x").unwrap(), None);
        assert_eq!(link.sent_count(), 0);
    }

    #[tokio::test]
    async fn upload_gate_skips_overlapping_saves() {
        let dir = TempDir::new().unwrap();
        let mut c = client(&dir);
        c.on_profile(&played(), &played().to_bytes().unwrap());
        let link = MemoryLink::new(PeerId(1));

        let held = c.ctx.in_flight().try_acquire(PeerId(1), events::PROFILE).unwrap();
        assert_eq!(c.upload_profile(&link, b"payload").await.unwrap(), None);
        // Other events are not blocked
        assert!(c.upload_inventory(&link, &[wood(1)]).await.unwrap().is_some());
        drop(held);

        let outcome = c.upload_profile(&link, b"payload").await.unwrap();
        assert!(matches!(outcome, Some(SendOutcome::Completed { .. })));
    }
}
