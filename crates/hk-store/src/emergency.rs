//! Client-side emergency backup staging.
//!
//! A backup is only pending when both the payload and its signature exist.
//! They are written and removed together.

use anyhow::{Context, Result};
use bytes::Bytes;
use hk_crypto::{BackupOffer, SignaturePackage};
use std::path::{Path, PathBuf};

use crate::atomic::write_atomic;

const PAYLOAD_SUFFIX: &str = ".fch.serverbackup";
const SIGNATURE_SUFFIX: &str = ".fch.signature";

#[derive(Debug, Clone)]
pub struct EmergencyBackup {
    payload_path: PathBuf,
    signature_path: PathBuf,
}

impl EmergencyBackup {
    /// `stem` is the local character file name without extension.
    pub fn new(dir: impl AsRef<Path>, stem: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            payload_path: dir.join(format!("{stem}{PAYLOAD_SUFFIX}")),
            signature_path: dir.join(format!("{stem}{SIGNATURE_SUFFIX}")),
        }
    }

    pub fn payload_path(&self) -> &Path {
        &self.payload_path
    }

    pub fn signature_path(&self) -> &Path {
        &self.signature_path
    }

    pub fn stage(&self, payload: &[u8], signature: &SignaturePackage) -> Result<()> {
        let encoded = signature.encode().context("encoding signature package")?;
        write_atomic(&self.signature_path, &encoded)?;
        write_atomic(&self.payload_path, payload)?;
        tracing::info!(
            backup = %self.payload_path.display(),
            bytes = payload.len(),
            "emergency backup staged"
        );
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        self.payload_path.is_file() && self.signature_path.is_file()
    }

    /// The staged offer, or `None` unless both files exist.
    pub fn load(&self) -> Result<Option<BackupOffer>> {
        if !self.is_pending() {
            return Ok(None);
        }
        let payload = std::fs::read(&self.payload_path)
            .with_context(|| format!("reading backup: {}", self.payload_path.display()))?;
        let raw = std::fs::read(&self.signature_path)
            .with_context(|| format!("reading signature: {}", self.signature_path.display()))?;
        let signature = SignaturePackage::decode(&raw)
            .with_context(|| format!("decoding signature: {}", self.signature_path.display()))?;
        Ok(Some(BackupOffer {
            payload: Bytes::from(payload),
            signature,
        }))
    }

    /// Remove both files. Missing files are not an error.
    pub fn clear(&self) -> Result<()> {
        for path in [&self.payload_path, &self.signature_path] {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!(file = %path.display(), "removed emergency backup file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("removing: {}", path.display()))
                }
            }
        }
        Ok(())
    }
}
