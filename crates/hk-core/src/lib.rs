//! hk-core: shared types for hearthkeep
//!
//! - `config`: `hearthkeep.toml` schema
//! - `error`: crate-spanning error type
//! - `wire`: little-endian packet reader/writer used by every message codec
//! - `types`: peer ids, event names, disconnect codes, handshake messages
//! - `profile`: the structured character profile record
//! - `admin`: admin-service request/response envelopes

pub mod admin;
pub mod config;
pub mod error;
pub mod profile;
pub mod types;
pub mod wire;

pub use error::{HkError, HkResult};
pub use profile::{PlayerTemplate, ProfileRecord};
pub use types::{is_forbidden_name, ConnectionStatus, DisconnectCode, PeerId};
