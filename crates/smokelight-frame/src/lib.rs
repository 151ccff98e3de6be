//! Payload packs for smokelight.
//!
//! A pack is one self-describing frame carrying zero or more named
//! payloads, each tagged Text or Binary:
//! - A 4-byte magic (`"SLPK"`) and a 4-byte version (always `0`)
//! - The total frame length and the payload count
//! - One record per payload, then a single `0x00` trailer byte
//!
//! All integers are little-endian `i32`. Readers hand back whole packs only;
//! partial reads are buffered internally.

pub mod codec;
pub mod error;
pub mod payload;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

#[cfg(feature = "async")]
pub use async_codec::PackCodec;
pub use codec::{
    decode_pack, encode_pack, pack, packed_len, unpack, FrameConfig, DEFAULT_MAX_FRAME_SIZE,
    HEADER_SIZE, MAGIC, MIN_PACK_SIZE, VERSION,
};
pub use error::{FrameError, Result};
pub use payload::{Payload, PayloadType};
pub use reader::PackReader;
pub use writer::PackWriter;
