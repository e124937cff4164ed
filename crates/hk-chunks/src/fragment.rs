//! Fragment codec.
//!
//! A compressed payload is cut into `fragment_size` slices, each sent as its
//! own message:
//!
//! ```text
//! transfer_id i64 | index i32 | total i32 | data (i32 length + bytes)
//! ```

use bytes::Bytes;
use hk_core::types::FRAGMENT_HEADER_LEN;
use hk_core::wire::{PacketReader, PacketWriter};
use hk_core::{HkError, HkResult};

/// Default slice size of compressed bytes per fragment.
pub const DEFAULT_FRAGMENT_SIZE: usize = 250_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub transfer_id: i64,
    pub index: u32,
    pub total: u32,
    pub data: Bytes,
}

impl Fragment {
    pub fn encode(&self) -> HkResult<Bytes> {
        let index = i32::try_from(self.index)
            .map_err(|_| HkError::codec(format!("fragment index {} out of range", self.index)))?;
        let total = i32::try_from(self.total)
            .map_err(|_| HkError::codec(format!("fragment total {} out of range", self.total)))?;
        let mut w = PacketWriter::with_capacity(FRAGMENT_HEADER_LEN + self.data.len());
        w.write_i64(self.transfer_id);
        w.write_i32(index);
        w.write_i32(total);
        w.write_bytes(&self.data)?;
        Ok(w.finish())
    }

    /// Decode and validate one fragment message.
    pub fn decode(body: &[u8]) -> HkResult<Self> {
        let mut r = PacketReader::new(body);
        let transfer_id = r.read_i64()?;
        let index = r.read_i32()?;
        let total = r.read_i32()?;
        let data = r.read_bytes()?;
        r.finish()?;

        let index = u32::try_from(index)
            .map_err(|_| HkError::codec(format!("negative fragment index {index}")))?;
        let total = u32::try_from(total)
            .map_err(|_| HkError::codec(format!("negative fragment total {total}")))?;
        if total == 0 {
            return Err(HkError::codec("fragment total is zero"));
        }
        if index >= total {
            return Err(HkError::codec(format!("fragment index {index} >= total {total}")));
        }

        Ok(Self {
            transfer_id,
            index,
            total,
            data: Bytes::copy_from_slice(data),
        })
    }
}

/// Number of fragments a compressed buffer of `len` bytes splits into.
/// Always at least one.
pub fn fragment_count(len: usize, fragment_size: usize) -> usize {
    if len == 0 {
        1
    } else {
        len.div_ceil(fragment_size.max(1))
    }
}

/// Slice `compressed` into fragments. Slices share the input buffer.
pub fn split_fragments(
    transfer_id: i64,
    compressed: Bytes,
    fragment_size: usize,
) -> HkResult<Vec<Fragment>> {
    if fragment_size == 0 {
        return Err(HkError::Transfer("fragment size must be non-zero".into()));
    }
    let count = fragment_count(compressed.len(), fragment_size);
    let total = u32::try_from(count)
        .ok()
        .filter(|&t| i32::try_from(t).is_ok())
        .ok_or_else(|| HkError::Transfer(format!("{count} fragments exceed the wire limit")))?;

    let fragments: Vec<Fragment> = (0..total)
        .map(|index| {
            let start = index as usize * fragment_size;
            let end = (start + fragment_size).min(compressed.len());
            Fragment {
                transfer_id,
                index,
                total,
                data: compressed.slice(start..end),
            }
        })
        .collect();

    tracing::trace!(transfer_id, fragments = total, bytes = compressed.len(), "split payload");
    Ok(fragments)
}

/// Concatenate fragment bodies in the order given.
pub fn join_fragments<'a, I>(parts: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}
