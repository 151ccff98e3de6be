/// Errors that can occur during pack encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame does not start with the `"SLPK"` magic.
    #[error("invalid frame magic (expected \"SLPK\")")]
    InvalidMagic,

    /// The frame declares a version this implementation does not speak.
    #[error("unsupported pack version {0} (expected 0)")]
    UnsupportedVersion(i32),

    /// A length field is negative or smaller than the fixed framing overhead.
    #[error("invalid length field {0}")]
    InvalidLength(i32),

    /// The payload count is negative.
    #[error("invalid payload count {0}")]
    InvalidCount(i32),

    /// The frame exceeds the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A payload record carries an unknown type code.
    #[error("invalid payload type {0}")]
    InvalidPayloadType(i32),

    /// A payload name or text body is not valid UTF-8.
    #[error("payload {field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    /// A payload record runs past the declared end of the frame.
    #[error("payload record truncated while reading {field}")]
    Truncated { field: &'static str },

    /// The records do not end exactly one byte before the declared end.
    #[error("frame length mismatch (declared {declared} bytes, records end at {actual})")]
    LengthMismatch { declared: usize, actual: usize },

    /// The trailing sentinel byte is not `0x00`.
    #[error("invalid trailer byte 0x{0:02x}")]
    InvalidTrailer(u8),

    /// A buffer handed to [`unpack`](crate::unpack) ends before the frame does.
    #[error("incomplete frame ({available} of {expected} bytes)")]
    Incomplete { expected: usize, available: usize },

    /// An I/O error occurred while reading or writing packs.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether this error means the peer sent bytes that are not a valid pack,
    /// as opposed to the stream failing or closing.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, FrameError::Io(_) | FrameError::ConnectionClosed)
    }

    /// Whether this error is a read/write timeout rather than a failure.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err) if matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
