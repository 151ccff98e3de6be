use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::payload::{Payload, PayloadType};

/// Pack header: magic (4) + version (4) + total length (4) + count (4) = 16 bytes.
pub const HEADER_SIZE: usize = 16;

/// Per-record fixed fields: type (4) + name length (4) + data length (4).
pub const RECORD_HEADER_SIZE: usize = 12;

/// Trailing sentinel byte.
pub const TRAILER: u8 = 0x00;

/// Smallest valid pack: header plus trailer, zero payloads.
pub const MIN_PACK_SIZE: usize = HEADER_SIZE + 1;

/// Magic bytes: "SLPK".
pub const MAGIC: [u8; 4] = *b"SLPK";

/// The only pack version defined so far.
pub const VERSION: i32 = 0;

/// Default maximum frame size: 16 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const WIRE_MAX: usize = i32::MAX as usize;

/// Exact wire size of the pack `encode_pack` produces for `payloads`.
pub fn packed_len(payloads: &[Payload]) -> usize {
    MIN_PACK_SIZE + payloads.iter().map(Payload::record_size).sum::<usize>()
}

/// Encode payloads into one pack.
///
/// Wire format (all integers little-endian `i32`):
/// ```text
/// ┌────────┬─────────┬───────────┬───────┬─────────────────────┬─────────┐
/// │ "SLPK" │ version │ total_len │ count │ record × count      │ 0x00    │
/// │ 4B     │ 4B (=0) │ 4B        │ 4B    │                     │ 1B      │
/// └────────┴─────────┴───────────┴───────┴─────────────────────┴─────────┘
///
/// record: type (4B, 0=Text 1=Binary) │ name_len (4B) │ name │ data_len (4B) │ data
/// ```
///
/// `total_len` counts every byte of the frame, header and trailer included.
pub fn encode_pack(payloads: &[Payload], dst: &mut BytesMut) -> Result<()> {
    let total = packed_len(payloads);
    if total > WIRE_MAX {
        return Err(FrameError::FrameTooLarge {
            size: total,
            max: WIRE_MAX,
        });
    }

    dst.reserve(total);
    dst.put_slice(&MAGIC);
    dst.put_i32_le(VERSION);
    dst.put_i32_le(total as i32);
    dst.put_i32_le(payloads.len() as i32);

    for payload in payloads {
        dst.put_i32_le(payload.payload_type().code());
        dst.put_i32_le(payload.name().len() as i32);
        dst.put_slice(payload.name().as_bytes());
        dst.put_i32_le(payload.data().len() as i32);
        dst.put_slice(payload.data());
    }

    dst.put_u8(TRAILER);
    Ok(())
}

/// Encode payloads into a freshly allocated, shareable buffer.
pub fn pack(payloads: &[Payload]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(packed_len(payloads));
    encode_pack(payloads, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode one pack from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete pack yet.
/// The magic, version and length fields are validated as soon as they are
/// available, so garbage is rejected without waiting for more bytes.
/// On success, consumes the pack bytes from the buffer.
pub fn decode_pack(src: &mut BytesMut, max_frame_size: usize) -> Result<Option<Vec<Payload>>> {
    let magic_len = src.len().min(MAGIC.len());
    if src[..magic_len] != MAGIC[..magic_len] {
        return Err(FrameError::InvalidMagic);
    }

    if src.len() >= 8 {
        let version = read_i32(&src[4..8]);
        if version != VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }
    }

    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let total = checked_total_len(read_i32(&src[8..12]), max_frame_size)?;
    let count = read_i32(&src[12..16]);
    if count < 0 {
        return Err(FrameError::InvalidCount(count));
    }

    if src.len() < total {
        return Ok(None); // Need more data
    }

    let frame = src.split_to(total).freeze();
    parse_records(frame, count as usize).map(Some)
}

/// Decode exactly one complete pack from `bytes`.
pub fn unpack(bytes: &[u8]) -> Result<Vec<Payload>> {
    let mut buf = BytesMut::from(bytes);
    match decode_pack(&mut buf, WIRE_MAX)? {
        Some(payloads) if buf.is_empty() => Ok(payloads),
        Some(_) => Err(FrameError::LengthMismatch {
            declared: bytes.len() - buf.len(),
            actual: bytes.len(),
        }),
        None => Err(FrameError::Incomplete {
            expected: expected_len(bytes),
            available: bytes.len(),
        }),
    }
}

fn expected_len(bytes: &[u8]) -> usize {
    if bytes.len() < HEADER_SIZE {
        return HEADER_SIZE;
    }
    read_i32(&bytes[8..12]).max(0) as usize
}

fn checked_total_len(total_len: i32, max_frame_size: usize) -> Result<usize> {
    if total_len < MIN_PACK_SIZE as i32 {
        return Err(FrameError::InvalidLength(total_len));
    }
    let total = total_len as usize;
    if total > max_frame_size {
        return Err(FrameError::FrameTooLarge {
            size: total,
            max: max_frame_size,
        });
    }
    Ok(total)
}

fn parse_records(frame: Bytes, count: usize) -> Result<Vec<Payload>> {
    let declared = frame.len();
    let mut body = frame.slice(HEADER_SIZE..);

    // Every record needs at least its fixed fields, so a huge count can't
    // force a huge allocation.
    let mut payloads = Vec::with_capacity(count.min(body.len() / RECORD_HEADER_SIZE));

    for _ in 0..count {
        let code = take_i32(&mut body, "type")?;
        let payload_type = PayloadType::try_from(code)?;

        let name_len = take_len(&mut body, "name")?;
        let name = String::from_utf8(body.split_to(name_len).to_vec())
            .map_err(|_| FrameError::InvalidUtf8 { field: "name" })?;

        let data_len = take_len(&mut body, "data")?;
        let data = body.split_to(data_len);
        if payload_type == PayloadType::Text && std::str::from_utf8(&data).is_err() {
            return Err(FrameError::InvalidUtf8 { field: "text" });
        }

        payloads.push(Payload::from_parts(name, payload_type, data));
    }

    match body.len() {
        0 => Err(FrameError::Truncated { field: "trailer" }),
        1 => match body[0] {
            TRAILER => Ok(payloads),
            other => Err(FrameError::InvalidTrailer(other)),
        },
        extra => Err(FrameError::LengthMismatch {
            declared,
            actual: declared - extra + 1,
        }),
    }
}

fn take_i32(body: &mut Bytes, field: &'static str) -> Result<i32> {
    if body.remaining() < 4 {
        return Err(FrameError::Truncated { field });
    }
    Ok(body.get_i32_le())
}

/// Read a length prefix and check the bytes it announces are present.
fn take_len(body: &mut Bytes, field: &'static str) -> Result<usize> {
    let len = take_i32(body, field)?;
    if len < 0 {
        return Err(FrameError::InvalidLength(len));
    }
    let len = len as usize;
    if body.remaining() < len {
        return Err(FrameError::Truncated { field });
    }
    Ok(len)
}

fn read_i32(bytes: &[u8]) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    i32::from_le_bytes(raw)
}

/// Configuration for the pack codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum frame size in bytes, header and trailer included. Default: 16 MiB.
    pub max_frame_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn sample() -> Vec<Payload> {
        vec![
            Payload::text("greeting", "hello world"),
            Payload::binary("number", 42i32.to_le_bytes().to_vec()),
            Payload::text("", ""),
        ]
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let payloads = sample();
        let mut buf = BytesMut::new();
        encode_pack(&payloads, &mut buf).unwrap();

        assert_eq!(buf.len(), packed_len(&payloads));

        let decoded = decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, payloads);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_wire_layout_is_bit_exact() {
        let bytes = pack(&[Payload::text("n", "ab")]).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(b"SLPK");
        expected.extend_from_slice(&0i32.to_le_bytes());
        expected.extend_from_slice(&32i32.to_le_bytes()); // 16 + 12 + 1 + 2 + 1
        expected.extend_from_slice(&1i32.to_le_bytes());
        expected.extend_from_slice(&0i32.to_le_bytes()); // Text
        expected.extend_from_slice(&1i32.to_le_bytes());
        expected.extend_from_slice(b"n");
        expected.extend_from_slice(&2i32.to_le_bytes());
        expected.extend_from_slice(b"ab");
        expected.push(0x00);

        assert_eq!(bytes.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_empty_pack() {
        let bytes = pack(&[]).unwrap();
        assert_eq!(bytes.len(), MIN_PACK_SIZE);
        assert!(unpack(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&b"SLPK\0\0"[..]);
        let result = decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 6, "incomplete input must not be consumed");
    }

    #[test]
    fn test_decode_incomplete_body() {
        let mut buf = BytesMut::new();
        encode_pack(&sample(), &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 5);

        let result = decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_decode_invalid_magic_rejected_early() {
        let mut buf = BytesMut::from(&b"SLX"[..]);
        let result = decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(result, Err(FrameError::InvalidMagic)));
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_decode_bad_version() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_i32_le(1);

        let result = decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(result, Err(FrameError::UnsupportedVersion(1))));
    }

    #[test]
    fn test_decode_total_len_below_minimum() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_i32_le(VERSION);
        buf.put_i32_le(16);
        buf.put_i32_le(0);

        let result = decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(result, Err(FrameError::InvalidLength(16))));
    }

    #[test]
    fn test_decode_negative_total_len() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_i32_le(VERSION);
        buf.put_i32_le(-5);
        buf.put_i32_le(0);

        let result = decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(result, Err(FrameError::InvalidLength(-5))));
    }

    #[test]
    fn test_decode_frame_too_large() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_i32_le(VERSION);
        buf.put_i32_le(1024 * 1024 * 32);
        buf.put_i32_le(1);

        let result = decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(result, Err(FrameError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_decode_negative_count() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_i32_le(VERSION);
        buf.put_i32_le(MIN_PACK_SIZE as i32);
        buf.put_i32_le(-1);
        buf.put_u8(TRAILER);

        let result = decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(result, Err(FrameError::InvalidCount(-1))));
    }

    #[test]
    fn test_decode_bad_trailer() {
        let mut buf = BytesMut::new();
        encode_pack(&sample(), &mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] = 0xFF;

        let result = decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(result, Err(FrameError::InvalidTrailer(0xFF))));
    }

    #[test]
    fn test_decode_unknown_payload_type() {
        let mut buf = BytesMut::new();
        encode_pack(&[Payload::binary("x", vec![1u8])], &mut buf).unwrap();
        buf[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(&9i32.to_le_bytes());

        let result = decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(result, Err(FrameError::InvalidPayloadType(9))));
    }

    #[test]
    fn test_decode_count_exceeding_records() {
        let mut buf = BytesMut::new();
        encode_pack(&[Payload::text("a", "b")], &mut buf).unwrap();
        buf[12..16].copy_from_slice(&2i32.to_le_bytes());

        let result = decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(result, Err(FrameError::Truncated { .. })));
    }

    #[test]
    fn test_decode_count_short_of_records() {
        let mut buf = BytesMut::new();
        encode_pack(&sample(), &mut buf).unwrap();
        buf[12..16].copy_from_slice(&1i32.to_le_bytes());

        let result = decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(result, Err(FrameError::LengthMismatch { .. })));
    }

    #[test]
    fn test_decode_invalid_utf8_text() {
        let mut buf = BytesMut::new();
        encode_pack(&[Payload::binary("t", vec![0xC3, 0x28])], &mut buf).unwrap();
        // Retag the record as Text.
        buf[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(&0i32.to_le_bytes());

        let result = decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(
            result,
            Err(FrameError::InvalidUtf8 { field: "text" })
        ));
    }

    #[test]
    fn test_multiple_packs_in_buffer() {
        let mut buf = BytesMut::new();
        encode_pack(&[Payload::text("first", "1")], &mut buf).unwrap();
        encode_pack(&[Payload::text("second", "2")], &mut buf).unwrap();

        let p1 = decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        let p2 = decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();

        assert_eq!(p1[0].name(), "first");
        assert_eq!(p2[0].name(), "second");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unpack_reports_incomplete() {
        let bytes = pack(&sample()).unwrap();
        let err = unpack(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Incomplete { expected, .. } if expected == bytes.len()
        ));
    }

    #[test]
    fn test_is_protocol_violation() {
        assert!(FrameError::InvalidMagic.is_protocol_violation());
        assert!(!FrameError::ConnectionClosed.is_protocol_violation());
    }

    fn arb_payload() -> impl Strategy<Value = Payload> {
        prop_oneof![
            (".{0,12}", ".{0,64}").prop_map(|(name, text)| Payload::text(name, text)),
            (".{0,12}", proptest::collection::vec(any::<u8>(), 0..64))
                .prop_map(|(name, data)| Payload::binary(name, data)),
        ]
    }

    proptest! {
        #[test]
        fn roundtrip_any_batch(payloads in proptest::collection::vec(arb_payload(), 0..8)) {
            let bytes = pack(&payloads).unwrap();
            prop_assert_eq!(bytes.len(), packed_len(&payloads));
            prop_assert_eq!(unpack(&bytes).unwrap(), payloads);
        }

        #[test]
        fn truncation_never_yields_payloads(
            payloads in proptest::collection::vec(arb_payload(), 0..6),
            cut in any::<prop::sample::Index>(),
        ) {
            let bytes = pack(&payloads).unwrap();
            let cut = cut.index(bytes.len());
            let mut buf = BytesMut::from(&bytes[..cut]);
            prop_assert!(decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().is_none());
            prop_assert!(unpack(&bytes[..cut]).is_err());
        }

        #[test]
        fn garbage_prefix_is_rejected(
            head in proptest::collection::vec(any::<u8>(), 4..32),
        ) {
            prop_assume!(head[..4] != MAGIC);
            let mut buf = BytesMut::from(head.as_slice());
            prop_assert!(matches!(
                decode_pack(&mut buf, DEFAULT_MAX_FRAME_SIZE),
                Err(FrameError::InvalidMagic)
            ));
        }
    }
}
