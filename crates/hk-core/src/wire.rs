//! Little-endian packet primitives shared by every hearthkeep message codec.
//!
//! Layout rules:
//! ```text
//! i32 / i64           little-endian
//! bytes               [i32 length][length bytes]
//! string              bytes, UTF-8
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{HkError, HkResult};

/// Append-only packet builder.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    /// Write a length-prefixed byte array.
    pub fn write_bytes(&mut self, data: &[u8]) -> HkResult<()> {
        let len = i32::try_from(data.len())
            .map_err(|_| HkError::codec(format!("byte array too long: {} bytes", data.len())))?;
        self.buf.reserve(4 + data.len());
        self.buf.put_i32_le(len);
        self.buf.put_slice(data);
        Ok(())
    }

    pub fn write_str(&mut self, value: &str) -> HkResult<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write bytes without a length prefix (only valid as the final field).
    pub fn write_raw(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over a received packet. Every read is bounds-checked.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn need(&self, n: usize, what: &str) -> HkResult<()> {
        if self.buf.len() < n {
            return Err(HkError::codec(format!(
                "truncated packet reading {what}: need {n} bytes, have {}",
                self.buf.len()
            )));
        }
        Ok(())
    }

    pub fn read_i32(&mut self) -> HkResult<i32> {
        self.need(4, "i32")?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_i64(&mut self) -> HkResult<i64> {
        self.need(8, "i64")?;
        Ok(self.buf.get_i64_le())
    }

    /// Read a length-prefixed byte array, borrowing from the packet.
    pub fn read_bytes(&mut self) -> HkResult<&'a [u8]> {
        let len = self.read_i32()?;
        let len = usize::try_from(len)
            .map_err(|_| HkError::codec(format!("negative byte array length: {len}")))?;
        self.need(len, "byte array")?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_string(&mut self) -> HkResult<String> {
        let raw = self.read_bytes()?;
        String::from_utf8(raw.to_vec()).map_err(|e| HkError::codec(format!("invalid UTF-8: {e}")))
    }

    /// Consume everything left in the packet.
    pub fn read_rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    /// Fail if unread bytes remain.
    pub fn finish(&self) -> HkResult<()> {
        if !self.buf.is_empty() {
            return Err(HkError::codec(format!(
                "{} trailing bytes after packet",
                self.buf.len()
            )));
        }
        Ok(())
    }
}
