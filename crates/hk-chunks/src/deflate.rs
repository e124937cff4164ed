//! Raw DEFLATE (no zlib or gzip container) over whole payloads.
//!
//! The empty payload maps to the empty buffer in both directions, so an
//! empty transfer is a single empty fragment.

use anyhow::{bail, Context, Result};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Compress `data` at best compression.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut encoder = DeflateEncoder::new(
        Vec::with_capacity(data.len() / 2 + 64),
        Compression::best(),
    );
    encoder.write_all(data).context("deflate write")?;
    encoder.finish().context("deflate finish")
}

/// Decompress, failing once the output would exceed `limit` bytes.
pub fn decompress(data: &[u8], limit: usize) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(data.len().saturating_mul(3).min(limit));
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    DeflateDecoder::new(data)
        .take(cap)
        .read_to_end(&mut out)
        .context("inflate")?;
    if out.len() > limit {
        bail!("decompressed payload exceeds {limit} bytes");
    }
    Ok(out)
}
