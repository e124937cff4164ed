//! Daemon lifecycle and the main loop.
//!
//! All session state lives in one `Hub` owned by the main loop. Connection
//! tasks, the admin service, and kick timers talk to it over channels, so
//! nothing in `ProfileServer` needs a lock.

use anyhow::{Context, Result};
use hk_core::admin::{PlayerEntry, StatusReport};
use hk_core::config::{expand_tilde, HearthConfig};
use hk_core::types::events;
use hk_core::{DisconnectCode, PeerId};
use hk_crypto::{KdfParams, KeyIssuer, Verdict};
use hk_store::{profile_file_stem, ProfileStore};
use hk_sync::{
    send_payload, Envelope, PeerLink, ProfileServer, ServerAction, TransferContext,
    TransferSettings,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::admin::{AdminCall, CommandRegistry};
use crate::metrics::DaemonMetrics;
use crate::net::{spawn_connection, NetEvent};

pub type SharedLink = Arc<dyn PeerLink + Send + Sync>;

const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Main-loop state.
pub struct Hub {
    server: ProfileServer,
    ctx: Arc<TransferContext>,
    links: HashMap<PeerId, SharedLink>,
    metrics: DaemonMetrics,
    kick_tx: mpsc::UnboundedSender<PeerId>,
    kick_grace: Duration,
    started: Instant,
}

impl Hub {
    pub fn new(
        server: ProfileServer,
        settings: TransferSettings,
        metrics: DaemonMetrics,
        kick_grace: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<PeerId>) {
        let (kick_tx, kick_rx) = mpsc::unbounded_channel();
        let hub = Self {
            server,
            ctx: Arc::new(TransferContext::new(settings)),
            links: HashMap::new(),
            metrics,
            kick_tx,
            kick_grace,
            started: Instant::now(),
        };
        (hub, kick_rx)
    }

    pub fn on_connected(&mut self, peer: PeerId, identity: &str, link: SharedLink) {
        info!(peer = %peer, identity, "peer connected");
        self.links.insert(peer, link);
        let actions = self.server.on_connect(peer, identity);
        self.execute(actions);
        self.metrics.set_connected(self.server.connected());
    }

    pub fn on_message(&mut self, peer: PeerId, envelope: Envelope) {
        if events::is_fragmented(&envelope.event) {
            self.metrics.fragment_received();
        }
        let actions = self.server.on_message(peer, &envelope.event, &envelope.body);
        self.execute(actions);
    }

    pub fn on_closed(&mut self, peer: PeerId) {
        self.links.remove(&peer);
        self.server.on_disconnect(peer);
        self.metrics.set_connected(self.server.connected());
        info!(peer = %peer, "peer disconnected");
    }

    pub fn sweep(&mut self) {
        let evicted = self.server.sweep(Instant::now());
        if evicted > 0 {
            debug!(evicted, "swept expired uploads");
        }
    }

    /// Force out a kicked peer that did not leave within the grace period.
    pub fn on_kick_deadline(&mut self, peer: PeerId) {
        if let Some(link) = self.links.get(&peer) {
            if link.is_connected() {
                info!(peer = %peer, "kick grace period over, disconnecting");
                link.disconnect_with(DisconnectCode::Kicked);
            }
        }
    }

    pub fn execute(&mut self, actions: Vec<ServerAction>) {
        for action in actions {
            match action {
                ServerAction::Send { peer, event, body } => {
                    if let Some(link) = self.links.get(&peer) {
                        link.send(event, body);
                    }
                }
                ServerAction::Transfer {
                    peer,
                    event,
                    payload,
                } => self.spawn_transfer(peer, event, payload),
                ServerAction::Disconnect { peer, code } => {
                    if let Some(link) = self.links.get(&peer) {
                        link.disconnect_with(code);
                    }
                }
                ServerAction::PayloadReceived { event, .. } => {
                    self.metrics.payload_received(event);
                }
                ServerAction::BackupVerdict { verdict, .. } => {
                    let label = match verdict {
                        Verdict::Accepted => "accepted",
                        Verdict::Rejected(reason) => reason.as_str(),
                    };
                    self.metrics.backup_verdict(label);
                }
            }
        }
    }

    fn spawn_transfer(&self, peer: PeerId, event: &'static str, payload: Vec<u8>) {
        let Some(link) = self.links.get(&peer).cloned() else {
            return;
        };
        let Some(guard) = self.ctx.in_flight().try_acquire(peer, event) else {
            warn!(peer = %peer, event, "transfer already in flight, dropping");
            return;
        };
        let ctx = Arc::clone(&self.ctx);
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let _guard = guard;
            match send_payload(&ctx, &*link, event, &payload).await {
                Ok(outcome) => metrics.transfer(outcome.as_str()),
                Err(e) => {
                    error!(peer = %peer, event, "transfer failed to start: {e}");
                    metrics.transfer("failed");
                }
            }
        });
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.started.elapsed().as_secs(),
            connected_peers: self.server.connected(),
            maintenance: self.server.is_maintenance(),
            pending_transfers: self.server.pending_transfers(),
        }
    }

    pub fn player_list(&self) -> Result<Vec<PlayerEntry>> {
        let online: HashSet<String> = self
            .server
            .peers()
            .into_iter()
            .filter_map(|p| {
                p.character
                    .map(|name| format!("{}.fch", profile_file_stem(&p.identity, &name)))
            })
            .collect();
        let entries = self.server.store().list()?;
        Ok(entries
            .into_iter()
            .map(|e| PlayerEntry {
                online: online.contains(&e.file_name),
                modified: e
                    .modified
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0),
                size: e.size,
                file_name: e.file_name,
            })
            .collect())
    }

    /// Peers for an optional identity filter; all peers when `None`.
    fn targets(&self, identity: Option<&str>) -> Vec<PeerId> {
        match identity {
            Some(id) => self.server.peers_for_identity(id),
            None => self.server.peers().into_iter().map(|p| p.peer).collect(),
        }
    }

    pub fn send_message(&mut self, identity: Option<&str>, text: &str) -> usize {
        let targets = self.targets(identity);
        for peer in &targets {
            let actions = self.server.message(*peer, text);
            self.execute(actions);
        }
        targets.len()
    }

    pub fn kick(&mut self, identity: &str, reason: &str) -> usize {
        let targets = self.targets(Some(identity));
        for peer in &targets {
            let actions = self.server.kick(*peer, reason);
            self.execute(actions);

            let tx = self.kick_tx.clone();
            let peer = *peer;
            let grace = self.kick_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let _ = tx.send(peer);
            });
        }
        info!(identity, kicked = targets.len(), "kick requested");
        targets.len()
    }

    pub fn set_maintenance(&mut self, enabled: bool) {
        self.server.set_maintenance(enabled);
    }
}

pub async fn run(config: HearthConfig) -> Result<()> {
    config.validate().context("invalid configuration")?;
    info!("daemon starting");

    let save_dir = expand_tilde(&config.storage.save_dir);
    let secret_path = config.crypto.secret_path(&config.storage);
    let secret = crate::secret::load_or_create(&secret_path)?;
    let issuer = KeyIssuer::new(
        secret,
        KdfParams {
            iterations: config.crypto.kdf_iterations,
        },
    )?;

    let store = ProfileStore::new(&save_dir, config.storage.backups_to_keep);
    info!(
        dir = %store.dir().display(),
        backups_to_keep = config.storage.backups_to_keep,
        "profile store ready"
    );

    let settings = TransferSettings::from(&config.transfer);
    let mut server = ProfileServer::new(store, issuer, &settings, &config.server);
    let template = config.server.player_template()?;
    if let Some(t) = &template {
        info!(items = t.items.len(), skills = t.skills.len(), "player template loaded");
    }
    server.set_template(template.as_ref())?;

    // Start Prometheus metrics endpoint
    let mut registry = prometheus_client::registry::Registry::default();
    let metrics = DaemonMetrics::new(&mut registry);
    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let registry = Arc::new(registry);
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, registry).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    let commands = CommandRegistry::standard()?;
    let (admin_tx, admin_rx) = mpsc::channel::<AdminCall>(32);
    if let Some(addr) = config.daemon.admin_listen.clone() {
        let max_frame = config.transfer.max_message_bytes;
        tokio::spawn(async move {
            if let Err(e) = crate::admin::serve(addr, admin_tx, max_frame).await {
                error!("admin service failed: {e}");
            }
        });
    }

    let listener = TcpListener::bind(&config.daemon.listen)
        .await
        .with_context(|| format!("binding game transport {}", config.daemon.listen))?;
    info!(addr = %config.daemon.listen, maintenance = config.server.maintenance, "game transport: listening");

    let (hub, kick_rx) = Hub::new(
        server,
        settings,
        metrics,
        Duration::from_secs(config.server.kick_grace_secs),
    );

    main_loop(
        hub,
        listener,
        config.transfer.max_message_bytes,
        admin_rx,
        kick_rx,
        commands,
    )
    .await
}

async fn main_loop(
    mut hub: Hub,
    listener: TcpListener,
    max_frame_bytes: usize,
    mut admin_rx: mpsc::Receiver<AdminCall>,
    mut kick_rx: mpsc::UnboundedReceiver<PeerId>,
    commands: CommandRegistry,
) -> Result<()> {
    let (net_tx, mut net_rx) = mpsc::unbounded_channel();
    let mut next_peer = 1u64;

    let mut sweep = interval(SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let peer = PeerId(next_peer);
                    next_peer += 1;
                    debug!(peer = %peer, addr = %addr, "accepted connection");
                    spawn_connection(peer, stream, addr, max_frame_bytes, net_tx.clone());
                }
                Err(e) => warn!("accept failed: {e}"),
            },

            Some(event) = net_rx.recv() => match event {
                NetEvent::Connected { peer, identity, link } => {
                    hub.on_connected(peer, &identity, link);
                }
                NetEvent::Message { peer, envelope } => hub.on_message(peer, envelope),
                NetEvent::Closed { peer } => hub.on_closed(peer),
            },

            Some(call) = admin_rx.recv() => {
                let AdminCall { request, reply } = call;
                let result = commands.dispatch(&mut hub, &request);
                let _ = reply.send(result);
            }

            Some(peer) = kick_rx.recv() => hub.on_kick_deadline(peer),

            _ = sweep.tick() => hub.sweep(),

            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
        }
    }
    Ok(())
}
