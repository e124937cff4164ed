use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HkError, HkResult};
use crate::profile::PlayerTemplate;
use crate::types::{events, FRAGMENT_HEADER_LEN};

/// Top-level configuration (loaded from hearthkeep.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HearthConfig {
    pub daemon: DaemonConfig,
    pub transfer: TransferConfig,
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Game transport listen address (default: 0.0.0.0:2457)
    pub listen: String,
    /// Admin command service address (default: 127.0.0.1:2458)
    pub admin_listen: Option<String>,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9100)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

/// Fragmented transfer tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes of compressed payload per fragment
    pub fragment_size: usize,
    /// Outbound queue depth above which the sender waits
    pub max_send_queue: usize,
    pub send_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Lifetime of a partial inbound transfer, from its first fragment
    pub reassembly_ttl_secs: u64,
    /// Largest single message the transport accepts
    pub max_message_bytes: usize,
    /// Ceiling on a decompressed payload
    pub max_payload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for canonical profiles and rotation archives
    pub save_dir: PathBuf,
    /// Archive entries kept per identity (0 disables archiving)
    pub backups_to_keep: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Server secret file (default: <save_dir>/server.secret)
    pub server_secret_file: Option<PathBuf>,
    /// PBKDF2 iteration count
    pub kdf_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Refuse non-admin peers on connect
    pub maintenance: bool,
    /// Identities allowed in during maintenance
    pub admins: Vec<String>,
    /// How long a kicked client gets to leave on its own
    pub kick_grace_secs: u64,
    /// Starting kit sent to clients for new characters
    pub template_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Ping below which a snapshot counts as known-good
    pub snapshot_ping_threshold_ms: u64,
    /// Where emergency backup files are staged
    pub backup_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:2457".into(),
            admin_listen: Some("127.0.0.1:2458".into()),
            metrics_addr: Some("127.0.0.1:9100".into()),
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            fragment_size: 250_000,
            max_send_queue: 20_000,
            send_timeout_secs: 30,
            poll_interval_ms: 20,
            reassembly_ttl_secs: 60,
            max_message_bytes: 512 * 1024,
            max_payload_bytes: 64 * 1024 * 1024,
        }
    }
}

impl HearthConfig {
    /// Reject settings that would only fail once traffic flows.
    pub fn validate(&self) -> HkResult<()> {
        self.transfer.validate()
    }
}

impl TransferConfig {
    /// Largest frame a fragment message produces: event name (with its i32
    /// length) plus fragment header plus a full slice.
    pub fn fragment_frame_len(&self) -> usize {
        4 + events::longest_name_len() + FRAGMENT_HEADER_LEN + self.fragment_size
    }

    pub fn validate(&self) -> HkResult<()> {
        if self.fragment_size == 0 {
            return Err(HkError::Config("transfer.fragment_size must be positive".into()));
        }
        if self.fragment_frame_len() > self.max_message_bytes {
            return Err(HkError::Config(format!(
                "transfer.fragment_size {} does not fit transfer.max_message_bytes {} \
                 ({} bytes per fragment frame)",
                self.fragment_size,
                self.max_message_bytes,
                self.fragment_frame_len()
            )));
        }
        if self.max_payload_bytes == 0 {
            return Err(HkError::Config("transfer.max_payload_bytes must be positive".into()));
        }
        Ok(())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reassembly_ttl(&self) -> Duration {
        Duration::from_secs(self.reassembly_ttl_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("~/.local/share/hearthkeep"),
            backups_to_keep: 25,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            server_secret_file: None,
            kdf_iterations: 1000,
        }
    }
}

impl CryptoConfig {
    /// Resolve the secret file path against the storage root.
    pub fn secret_path(&self, storage: &StorageConfig) -> PathBuf {
        match &self.server_secret_file {
            Some(p) => expand_tilde(p),
            None => expand_tilde(&storage.save_dir).join("server.secret"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            maintenance: false,
            admins: Vec::new(),
            kick_grace_secs: 30,
            template_file: None,
        }
    }
}

impl ServerConfig {
    pub fn player_template(&self) -> HkResult<Option<PlayerTemplate>> {
        self.template_file
            .as_deref()
            .map(|p| PlayerTemplate::from_file(&expand_tilde(p)))
            .transpose()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            snapshot_ping_threshold_ms: 1500,
            backup_dir: PathBuf::from("~/.local/share/hearthkeep/characters"),
        }
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}
