//! `tokio_util::codec` adapter for packs.
//!
//! Lets tokio users drive the same wire format through `Framed`,
//! `FramedRead` and `FramedWrite`.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_pack, encode_pack, packed_len, FrameConfig};
use crate::error::{FrameError, Result};
use crate::payload::Payload;

/// Pack codec: decodes one `Vec<Payload>` per frame.
#[derive(Debug, Clone)]
pub struct PackCodec {
    max_frame_size: usize,
}

impl PackCodec {
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    pub fn with_config(config: &FrameConfig) -> Self {
        Self {
            max_frame_size: config.max_frame_size,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for PackCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PackCodec {
    type Item = Vec<Payload>;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        decode_pack(src, self.max_frame_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(payloads) => Ok(Some(payloads)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Vec<Payload>> for PackCodec {
    type Error = FrameError;

    fn encode(&mut self, payloads: Vec<Payload>, dst: &mut BytesMut) -> Result<()> {
        Encoder::<&[Payload]>::encode(self, payloads.as_slice(), dst)
    }
}

impl<'a> Encoder<&'a [Payload]> for PackCodec {
    type Error = FrameError;

    fn encode(&mut self, payloads: &'a [Payload], dst: &mut BytesMut) -> Result<()> {
        let size = packed_len(payloads);
        if size > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        encode_pack(payloads, dst)
    }
}

impl Encoder<Payload> for PackCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: Payload, dst: &mut BytesMut) -> Result<()> {
        Encoder::<&[Payload]>::encode(self, std::slice::from_ref(&payload), dst)
    }
}
