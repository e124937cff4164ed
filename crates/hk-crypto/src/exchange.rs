//! Per-connection key issue.
//!
//! Key exchange message (server → client, once per connection):
//! ```text
//! key (i32 length = 32, bytes) | timestamp i64
//! ```

use bytes::Bytes;
use hk_core::wire::{PacketReader, PacketWriter};
use hk_core::{HkError, HkResult};
use secrecy::SecretString;

use crate::kdf::{derive_session_key, timestamp_now, KdfParams, SessionKey};
use crate::KEY_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExchange {
    pub key: SessionKey,
    pub timestamp: i64,
}

impl KeyExchange {
    pub fn encode(&self) -> HkResult<Bytes> {
        let mut w = PacketWriter::with_capacity(4 + KEY_SIZE + 8);
        w.write_bytes(self.key.as_bytes())?;
        w.write_i64(self.timestamp);
        Ok(w.finish())
    }

    pub fn decode(body: &[u8]) -> HkResult<Self> {
        let mut r = PacketReader::new(body);
        let raw = r.read_bytes()?;
        let timestamp = r.read_i64()?;
        r.finish()?;
        let bytes: [u8; KEY_SIZE] = raw
            .try_into()
            .map_err(|_| HkError::codec(format!("session key must be {KEY_SIZE} bytes, got {}", raw.len())))?;
        Ok(Self {
            key: SessionKey::from_bytes(bytes),
            timestamp,
        })
    }
}

/// Issues session keys and re-derives them when a signed backup comes back.
#[derive(Debug)]
pub struct KeyIssuer {
    secret: SecretString,
    params: KdfParams,
}

impl KeyIssuer {
    pub fn new(secret: SecretString, params: KdfParams) -> anyhow::Result<Self> {
        if params.iterations == 0 {
            anyhow::bail!("KDF iteration count must be at least 1");
        }
        Ok(Self { secret, params })
    }

    /// Key for a new connection, stamped with the current time.
    pub fn issue(&self) -> KeyExchange {
        self.issue_at(timestamp_now())
    }

    pub fn issue_at(&self, timestamp: i64) -> KeyExchange {
        KeyExchange {
            key: self.rederive(timestamp),
            timestamp,
        }
    }

    pub fn rederive(&self, timestamp: i64) -> SessionKey {
        derive_session_key(&self.secret, timestamp, &self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> KeyIssuer {
        KeyIssuer::new(SecretString::from("hunter2"), KdfParams::default()).unwrap()
    }

    #[test]
    fn zero_iterations_rejected() {
        assert!(KeyIssuer::new(SecretString::from("x"), KdfParams { iterations: 0 }).is_err());
    }

    #[test]
    fn issued_key_rederives() {
        let issuer = issuer();
        let exchange = issuer.issue();
        assert_eq!(issuer.rederive(exchange.timestamp), exchange.key);
    }

    #[test]
    fn exchange_wire_roundtrip() {
        let exchange = issuer().issue_at(42);
        let wire = exchange.encode().unwrap();
        assert_eq!(wire.len(), 4 + KEY_SIZE + 8);
        assert_eq!(KeyExchange::decode(&wire).unwrap(), exchange);
    }

    #[test]
    fn short_key_rejected() {
        let mut w = PacketWriter::new();
        w.write_bytes(&[1u8; 16]).unwrap();
        w.write_i64(42);
        assert!(KeyExchange::decode(&w.finish()).is_err());
    }
}
