//! Emergency backup signatures
//!
//! Signature package (binary):
//! ```text
//! encrypted_hash (i32 length + bytes) | iv (i32 length = 16, bytes) | timestamp i64
//! ```
//! `encrypted_hash` is the SHA-512 of the profile payload under AES-256-CBC
//! with PKCS#7 padding (80 bytes for a 64-byte digest).
//!
//! The backup offer sent on reconnect bundles payload and package:
//! ```text
//! payload (i32 length + bytes) | package (i32 length + bytes)
//! ```

use aes::Aes256;
use bytes::Bytes;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hk_core::wire::{PacketReader, PacketWriter};
use hk_core::{HkError, HkResult};
use rand::RngCore;
use sha2::{Digest, Sha512};

use crate::kdf::SessionKey;
use crate::IV_SIZE;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePackage {
    pub encrypted_hash: Vec<u8>,
    pub iv: [u8; IV_SIZE],
    /// Timestamp of the session key that produced this signature
    pub timestamp: i64,
}

impl SignaturePackage {
    pub fn encode(&self) -> HkResult<Bytes> {
        let mut w = PacketWriter::with_capacity(4 + self.encrypted_hash.len() + 4 + IV_SIZE + 8);
        w.write_bytes(&self.encrypted_hash)?;
        w.write_bytes(&self.iv)?;
        w.write_i64(self.timestamp);
        Ok(w.finish())
    }

    pub fn decode(body: &[u8]) -> HkResult<Self> {
        let mut r = PacketReader::new(body);
        let encrypted_hash = r.read_bytes()?.to_vec();
        let iv_raw = r.read_bytes()?;
        let timestamp = r.read_i64()?;
        r.finish()?;
        let iv = iv_raw
            .try_into()
            .map_err(|_| HkError::codec(format!("IV must be {IV_SIZE} bytes, got {}", iv_raw.len())))?;
        Ok(Self {
            encrypted_hash,
            iv,
            timestamp,
        })
    }

    /// Decrypt the embedded hash. `None` on bad padding or length.
    pub(crate) fn decrypt_hash(&self, key: &SessionKey) -> Option<Vec<u8>> {
        let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), &self.iv).ok()?;
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&self.encrypted_hash)
            .ok()
    }
}

/// Sign `payload` with a session key issued at `timestamp`.
pub fn sign_profile(
    payload: &[u8],
    key: &SessionKey,
    timestamp: i64,
) -> HkResult<SignaturePackage> {
    let hash = Sha512::digest(payload);

    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| HkError::Crypto(format!("AES-CBC init failed: {e}")))?;
    let encrypted_hash = cipher.encrypt_padded_vec_mut::<Pkcs7>(&hash);

    Ok(SignaturePackage {
        encrypted_hash,
        iv,
        timestamp,
    })
}

/// A staged backup offered to the server after reconnecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOffer {
    pub payload: Bytes,
    pub signature: SignaturePackage,
}

impl BackupOffer {
    pub fn encode(&self) -> HkResult<Bytes> {
        let sig = self.signature.encode()?;
        let mut w = PacketWriter::with_capacity(8 + self.payload.len() + sig.len());
        w.write_bytes(&self.payload)?;
        w.write_bytes(&sig)?;
        Ok(w.finish())
    }

    pub fn decode(body: &[u8]) -> HkResult<Self> {
        let mut r = PacketReader::new(body);
        let payload = Bytes::copy_from_slice(r.read_bytes()?);
        let signature = SignaturePackage::decode(r.read_bytes()?)?;
        r.finish()?;
        Ok(Self { payload, signature })
    }
}
