use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{HkError, HkResult};
use crate::wire::{PacketReader, PacketWriter};

/// Handshake protocol version. Bumped whenever a message layout changes.
pub const PROTOCOL_VERSION: i32 = 3;

/// Per-fragment wire overhead: transfer id, index, total, data length.
pub const FRAGMENT_HEADER_LEN: usize = 8 + 4 + 4 + 4;

/// Transport-assigned connection id. Unique for the lifetime of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Message event names carried on the host channel.
pub mod events {
    /// Full profile payload (both directions, fragmented)
    pub const PROFILE: &str = "hearthkeep.profile";
    /// Inventory section push (client → server, fragmented)
    pub const INVENTORY: &str = "hearthkeep.inventory";
    /// Emergency backup offer (client → server, fragmented)
    pub const SIGNATURE_CHECK: &str = "hearthkeep.signature-check";
    /// Login handshake (client → server, direct)
    pub const HELLO: &str = "hearthkeep.hello";
    /// Session key + timestamp (server → client, direct)
    pub const KEY_EXCHANGE: &str = "hearthkeep.key-exchange";
    /// Disconnect code (server → client, direct)
    pub const ERROR: &str = "hearthkeep.error";
    /// Operator broadcast (server → client, direct)
    pub const MESSAGE: &str = "hearthkeep.message";
    /// Reason shown to a kicked player (server → client, direct)
    pub const KICK_MESSAGE: &str = "hearthkeep.kick-message";
    /// Server's starting kit for new characters (server → client, direct)
    pub const TEMPLATE: &str = "hearthkeep.template";

    pub const ALL: &[&str] = &[
        PROFILE,
        INVENTORY,
        SIGNATURE_CHECK,
        HELLO,
        KEY_EXCHANGE,
        ERROR,
        MESSAGE,
        KICK_MESSAGE,
        TEMPLATE,
    ];

    /// Length of the longest event name, for frame-size budgeting.
    pub fn longest_name_len() -> usize {
        ALL.iter().map(|e| e.len()).max().unwrap_or(0)
    }

    /// Events whose bodies are fragments of a compressed transfer.
    pub fn is_fragmented(event: &str) -> bool {
        matches!(event, PROFILE | INVENTORY | SIGNATURE_CHECK)
    }
}

/// Codes the server attaches to a forced disconnect so the client can show
/// a specific message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum DisconnectCode {
    VersionMismatch = 3,
    /// Generic connection failure; also used when a send queue never drains.
    ConnectFailed = 5,
    Maintenance = 9001,
    ForbiddenName = 9002,
    Kicked = 9003,
}

impl DisconnectCode {
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            3 => Some(Self::VersionMismatch),
            5 => Some(Self::ConnectFailed),
            9001 => Some(Self::Maintenance),
            9002 => Some(Self::ForbiddenName),
            9003 => Some(Self::Kicked),
            _ => None,
        }
    }

    /// Text shown to the player on the connection-failed screen.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::VersionMismatch => "Client and server versions do not match.",
            Self::ConnectFailed => "Connection to the server failed.",
            Self::Maintenance => "Server is undergoing maintenance. Please try again later.",
            Self::ForbiddenName => {
                "Your character name contains illegal characters. Please choose a different name."
            }
            Self::Kicked => "You have been kicked from the server.",
        }
    }

    pub fn encode(self) -> bytes::Bytes {
        let mut w = PacketWriter::with_capacity(4);
        w.write_i32(self as i32);
        w.finish()
    }

    pub fn decode(body: &[u8]) -> HkResult<Self> {
        let mut r = PacketReader::new(body);
        let code = r.read_i32()?;
        r.finish()?;
        Self::from_i32(code).ok_or_else(|| HkError::codec(format!("unknown disconnect code {code}")))
    }
}

/// Client-side view of the connection, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    None,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

/// First direct message a client sends after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub protocol_version: i32,
    pub character_name: String,
}

impl Hello {
    pub fn new(character_name: impl Into<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            character_name: character_name.into(),
        }
    }

    pub fn encode(&self) -> HkResult<bytes::Bytes> {
        let mut w = PacketWriter::new();
        w.write_i32(self.protocol_version);
        w.write_str(&self.character_name)?;
        Ok(w.finish())
    }

    pub fn decode(body: &[u8]) -> HkResult<Self> {
        let mut r = PacketReader::new(body);
        let protocol_version = r.read_i32()?;
        let character_name = r.read_string()?;
        r.finish()?;
        Ok(Self {
            protocol_version,
            character_name,
        })
    }
}

/// Encode a single-string direct message (operator messages, kick reasons).
pub fn encode_text(text: &str) -> HkResult<bytes::Bytes> {
    let mut w = PacketWriter::new();
    w.write_str(text)?;
    Ok(w.finish())
}

pub fn decode_text(body: &[u8]) -> HkResult<String> {
    let mut r = PacketReader::new(body);
    let text = r.read_string()?;
    r.finish()?;
    Ok(text)
}

/// Character names must be at least three characters of letters, spaces,
/// and apostrophes.
pub fn is_forbidden_name(name: &str) -> bool {
    name.chars().count() < 3 || name.chars().any(|c| c != ' ' && c != '\'' && !c.is_alphabetic())
}
