//! hkctl: hearthkeep admin CLI
//!
//! Commands that talk to a running hkd over its admin port:
//!   status                        - daemon status
//!   players                       - stored profiles and who is online
//!   message [--to <id>] <text>    - chat message to one identity or everyone
//!   kick <id> [--reason <text>]   - kick an identity
//!   maintenance on|off            - toggle maintenance mode
//!
//! Local commands (read the save directory directly):
//!   config show                   - display current configuration
//!   backups <profile>             - list archive entries for a profile

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use futures::{SinkExt, StreamExt};
use hk_core::admin::{commands, AdminRequest, AdminResponse, PlayerEntry, StatusReport};
use hk_core::config::{expand_tilde, HearthConfig};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "hkctl",
    version,
    about = "hearthkeep admin client",
    long_about = "hkctl: inspect and control a running hkd profile server"
)]
struct Cli {
    /// Path to hearthkeep.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "HEARTHKEEP_CONFIG",
        default_value = "/etc/hearthkeep/config.toml"
    )]
    config: PathBuf,

    /// Admin service address (overrides daemon.admin_listen)
    #[arg(long, env = "HEARTHKEEP_ADMIN")]
    admin: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show daemon status
    Status,

    /// List stored profiles and mark the ones in use
    Players,

    /// Send a chat message
    Message {
        text: String,
        /// Target identity (default: everyone connected)
        #[arg(long)]
        to: Option<String>,
    },

    /// Kick every connection of an identity
    Kick {
        identity: String,
        #[arg(long, short = 'r')]
        reason: Option<String>,
    },

    /// Turn maintenance mode on or off
    Maintenance { state: Switch },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List rotation archive entries for a profile
    ///
    /// Takes the profile file name as shown by `hkctl players`
    /// (e.g. 10.0.0.1_Sigrid.fch).
    Backups { profile: String },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Switch {
    On,
    Off,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;
    let admin = cli
        .admin
        .clone()
        .or_else(|| config.daemon.admin_listen.clone());

    match cli.command {
        Commands::Status => cmd_status(&config, admin.as_deref()).await,
        Commands::Players => cmd_players(&config, admin.as_deref()).await,
        Commands::Message { text, to } => {
            let payload = json!({ "identity": to, "text": text });
            let out = admin_call(&config, admin.as_deref(), commands::SEND_MESSAGE, payload).await?;
            println!("delivered to {} peer(s)", out["delivered"]);
            Ok(())
        }
        Commands::Kick { identity, reason } => {
            let payload = json!({ "identity": identity, "reason": reason });
            let out = admin_call(&config, admin.as_deref(), commands::KICK, payload).await?;
            println!("kicked {} connection(s)", out["kicked"]);
            Ok(())
        }
        Commands::Maintenance { state } => {
            let payload = json!({ "enabled": state == Switch::On });
            admin_call(&config, admin.as_deref(), commands::MAINTENANCE, payload).await?;
            println!("maintenance: {}", if state == Switch::On { "on" } else { "off" });
            Ok(())
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
        Commands::Backups { profile } => cmd_backups(&config, &profile),
    }
}

async fn load_config(path: &Path) -> Result<HearthConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(HearthConfig::default())
    }
}

// ── Admin transport ───────────────────────────────────────────────────────────

async fn admin_call(
    config: &HearthConfig,
    addr: Option<&str>,
    command: &str,
    payload: Value,
) -> Result<Value> {
    let addr = addr.context("no admin address; set daemon.admin_listen or pass --admin")?;
    let stream = TcpStream::connect(addr).await.with_context(|| {
        format!("connecting to hkd admin service at {addr}\n  Is hkd running?")
    })?;
    let mut framed = Framed::new(stream, hk_sync::frame_codec(config.transfer.max_message_bytes));

    let key = format!("hkctl-{}", std::process::id());
    let request = AdminRequest::new(key.as_str(), command, payload);
    framed.send(Bytes::from(request.to_bytes()?)).await?;

    let frame = framed
        .next()
        .await
        .context("admin service closed the connection")??;
    let response = AdminResponse::from_bytes(&frame)?;
    into_result(response, &key)
}

fn into_result(response: AdminResponse, key: &str) -> Result<Value> {
    if response.key != key {
        anyhow::bail!("response for another request ({})", response.key);
    }
    if !response.ok {
        anyhow::bail!(
            "{}",
            response.error.unwrap_or_else(|| "command failed".to_string())
        );
    }
    Ok(response.result.unwrap_or(Value::Null))
}

// ── `hkctl status` / `hkctl players` ─────────────────────────────────────────

async fn cmd_status(config: &HearthConfig, addr: Option<&str>) -> Result<()> {
    let out = admin_call(config, addr, commands::STATUS, Value::Null).await?;
    let status: StatusReport = serde_json::from_value(out).context("decoding status")?;

    println!("hkd v{}", status.version);
    println!("  uptime:            {}", format_uptime(status.uptime_secs));
    println!("  listen:            {}", config.daemon.listen);
    println!("  connected peers:   {}", status.connected_peers);
    println!("  pending transfers: {}", status.pending_transfers);
    println!(
        "  maintenance:       {}",
        if status.maintenance { "ON" } else { "off" }
    );
    Ok(())
}

async fn cmd_players(config: &HearthConfig, addr: Option<&str>) -> Result<()> {
    let out = admin_call(config, addr, commands::PLAYER_LIST, Value::Null).await?;
    let players: Vec<PlayerEntry> = serde_json::from_value(out).context("decoding player list")?;
    print!("{}", render_players(&players));
    Ok(())
}

fn render_players(players: &[PlayerEntry]) -> String {
    if players.is_empty() {
        return "no stored profiles\n".to_string();
    }
    let width = players
        .iter()
        .map(|p| p.file_name.len())
        .max()
        .unwrap_or(0)
        .max("PROFILE".len());
    let mut out = format!("{:<width$}  {:>10}  {:>12}  ONLINE\n", "PROFILE", "SIZE", "MODIFIED");
    for p in players {
        out.push_str(&format!(
            "{:<width$}  {:>10}  {:>12}  {}\n",
            p.file_name,
            p.size,
            p.modified,
            if p.online { "yes" } else { "" }
        ));
    }
    out
}

fn format_uptime(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

// ── `hkctl config show` ───────────────────────────────────────────────────────

fn cmd_config_show(config: &HearthConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── `hkctl backups` ───────────────────────────────────────────────────────────

fn cmd_backups(config: &HearthConfig, profile: &str) -> Result<()> {
    let store = hk_store::ProfileStore::new(
        expand_tilde(&config.storage.save_dir),
        config.storage.backups_to_keep,
    );
    print!("{}", render_backups(&store, profile)?);
    Ok(())
}

fn render_backups(store: &hk_store::ProfileStore, profile: &str) -> Result<String> {
    let stem = profile.strip_suffix(".fch").unwrap_or(profile);
    let entries = store.archive().entries(stem)?;
    if entries.is_empty() {
        return Ok(format!("no archive entries for {stem}\n"));
    }
    let mut out = format!("{:>6}  {:>12}  {:>10}  FILE\n", "SEQ", "ARCHIVED", "SIZE");
    for e in &entries {
        out.push_str(&format!(
            "{:>6}  {:>12}  {:>10}  {}\n",
            e.seq,
            e.archived_at,
            e.size,
            e.path.display()
        ));
    }
    Ok(out)
}
