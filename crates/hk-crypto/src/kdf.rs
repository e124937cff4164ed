//! Key derivation: server secret + timestamp → session key

use base64::Engine;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// A 256-bit key derived for one connection.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey {
    bytes: [u8; KEY_SIZE],
}

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// PBKDF2 parameters
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// HMAC-SHA256 iterations (default: 1000)
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self { iterations: 1000 }
    }
}

/// Derive the session key for `timestamp`. Either side holding the secret
/// gets the same key for the same timestamp.
pub fn derive_session_key(secret: &SecretString, timestamp: i64, params: &KdfParams) -> SessionKey {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        secret.expose_secret().as_bytes(),
        &timestamp.to_le_bytes(),
        params.iterations,
        &mut key,
    );
    SessionKey::from_bytes(key)
}

/// Fresh random server secret, base64 encoded.
pub fn generate_server_secret() -> SecretString {
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
    raw.zeroize();
    SecretString::from(encoded)
}

/// Microseconds since the Unix epoch.
pub fn timestamp_now() -> i64 {
    timestamp_from_system_time(SystemTime::now())
}

/// Times before the epoch clamp to 0.
pub fn timestamp_from_system_time(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// `None` for negative or unrepresentable timestamps.
pub fn timestamp_to_system_time(timestamp: i64) -> Option<SystemTime> {
    let micros = u64::try_from(timestamp).ok()?;
    UNIX_EPOCH.checked_add(Duration::from_micros(micros))
}
