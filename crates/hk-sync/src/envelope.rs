//! Stream framing for socket transports.
//!
//! ```text
//! [u32 LE frame length][event name (i32 length + UTF-8)][body ...]
//! ```

use bytes::{Bytes, BytesMut};
use hk_core::wire::{PacketReader, PacketWriter};
use hk_core::HkError;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// One named message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub event: String,
    pub body: Bytes,
}

impl Envelope {
    pub fn new(event: impl Into<String>, body: Bytes) -> Self {
        Self {
            event: event.into(),
            body,
        }
    }
}

/// Length-delimited codec carrying `Envelope`s, with a frame ceiling.
#[derive(Debug)]
pub struct EnvelopeCodec {
    frames: LengthDelimitedCodec,
}

/// Little-endian u32 length prefix. Shared by the game transport and the
/// admin service.
pub fn frame_codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .little_endian()
        .length_field_type::<u32>()
        .max_frame_length(max_frame_bytes)
        .new_codec()
}

impl EnvelopeCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            frames: frame_codec(max_frame_bytes),
        }
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = HkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, HkError> {
        let Some(frame) = self.frames.decode(src)? else {
            return Ok(None);
        };
        let mut r = PacketReader::new(&frame);
        let event = r.read_string()?;
        let body = Bytes::copy_from_slice(r.read_rest());
        Ok(Some(Envelope { event, body }))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = HkError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), HkError> {
        let mut w = PacketWriter::with_capacity(4 + item.event.len() + item.body.len());
        w.write_str(&item.event)?;
        w.write_raw(&item.body);
        self.frames.encode(w.finish(), dst)?;
        Ok(())
    }
}
