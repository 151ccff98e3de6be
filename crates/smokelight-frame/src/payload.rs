use bytes::Bytes;

use crate::error::FrameError;

/// Wire tag of a payload record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PayloadType {
    /// UTF-8 text.
    Text = 0,
    /// Opaque bytes.
    Binary = 1,
}

impl PayloadType {
    /// The `i32` code written on the wire.
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PayloadType::Text => "text",
            PayloadType::Binary => "binary",
        }
    }
}

impl TryFrom<i32> for PayloadType {
    type Error = FrameError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(PayloadType::Text),
            1 => Ok(PayloadType::Binary),
            other => Err(FrameError::InvalidPayloadType(other)),
        }
    }
}

/// One named, typed unit of application data.
///
/// Payloads are immutable. Two payloads are equal iff their name, type and
/// data bytes are all equal; a Text and a Binary payload holding the same
/// bytes are different payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Payload {
    name: String,
    payload_type: PayloadType,
    data: Bytes,
}

impl Payload {
    /// Create a Text payload.
    pub fn text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload_type: PayloadType::Text,
            data: Bytes::from(text.into().into_bytes()),
        }
    }

    /// Create a Binary payload.
    pub fn binary(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            payload_type: PayloadType::Binary,
            data: data.into(),
        }
    }

    /// Rebuild a payload from decoded parts. Text data must already be
    /// validated as UTF-8.
    pub(crate) fn from_parts(name: String, payload_type: PayloadType, data: Bytes) -> Self {
        Self {
            name,
            payload_type,
            data,
        }
    }

    /// Payload name. Not required to be unique within a pack.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    pub fn is_text(&self) -> bool {
        self.payload_type == PayloadType::Text
    }

    pub fn is_binary(&self) -> bool {
        self.payload_type == PayloadType::Binary
    }

    /// The text body, or `None` for Binary payloads.
    pub fn text_data(&self) -> Option<&str> {
        match self.payload_type {
            PayloadType::Text => std::str::from_utf8(&self.data).ok(),
            PayloadType::Binary => None,
        }
    }

    /// Raw data bytes (UTF-8 encoded text for Text payloads).
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle to the data bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Size of this payload's record on the wire.
    pub fn record_size(&self) -> usize {
        crate::codec::RECORD_HEADER_SIZE + self.name.len() + self.data.len()
    }
}
