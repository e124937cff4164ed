//! hk-crypto: session keys and emergency backup signatures
//!
//! ```text
//! server secret ──PBKDF2-HMAC-SHA256(salt = timestamp LE)──▶ session key (32 bytes)
//!
//! signature = AES-256-CBC(session key, random IV, SHA-512(payload))
//! package   = encrypted hash | IV | timestamp
//! ```
//!
//! The server hands each connection a `(key, timestamp)` pair. A client that
//! loses its connection signs its local save with that key; on reconnect the
//! server re-derives the key from the timestamp in the package, checks the
//! hash, and refuses packages older than the profile it already holds.

pub mod exchange;
pub mod kdf;
pub mod signature;
pub mod verify;

pub use exchange::{KeyExchange, KeyIssuer};
pub use kdf::{
    derive_session_key, generate_server_secret, timestamp_from_system_time, timestamp_now,
    timestamp_to_system_time, KdfParams, SessionKey,
};
pub use signature::{sign_profile, BackupOffer, SignaturePackage};
pub use verify::{BackupVerifier, RejectReason, Verdict};

/// Session key size in bytes (AES-256)
pub const KEY_SIZE: usize = 32;

/// AES block / CBC IV size
pub const IV_SIZE: usize = 16;

/// SHA-512 digest size
pub const HASH_SIZE: usize = 64;
