use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use smokelight_transport::{TcpConnection, TransportError};
use tracing::trace;

use crate::codec::{decode_pack, FrameConfig};
use crate::error::{FrameError, Result};
use crate::payload::Payload;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete packs from any `Read` stream.
///
/// Partial reads are buffered internally; callers only ever see whole packs.
pub struct PackReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> PackReader<T> {
    /// Create a new pack reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new pack reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete pack (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached, and
    /// surfaces a read timeout as `FrameError::Io`.
    pub fn read_pack(&mut self) -> Result<Vec<Payload>> {
        match self.poll_pack()? {
            Some(payloads) => Ok(payloads),
            None => Err(FrameError::Io(std::io::Error::from(ErrorKind::TimedOut))),
        }
    }

    /// Wait for the next pack for at most one read timeout.
    ///
    /// Returns `Ok(None)` when the read timed out without a complete pack.
    /// Bytes of a partially received pack stay buffered, so the next call
    /// picks up where this one stopped.
    pub fn poll_pack(&mut self) -> Result<Option<Vec<Payload>>> {
        loop {
            if let Some(payloads) = decode_pack(&mut self.buf, self.config.max_frame_size)? {
                trace!(payloads = payloads.len(), "decoded pack");
                return Ok(Some(payloads));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Whether bytes of a not yet complete pack are buffered.
    pub fn has_buffered_data(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum frame size for subsequent decoding.
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.config.max_frame_size = max_frame_size;
    }

    /// Current pack reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl PackReader<TcpConnection> {
    /// Create a pack reader for `TcpConnection` and apply read timeout from config.
    pub fn with_config_tcp(inner: TcpConnection, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: TransportError) -> FrameError {
    match err {
        TransportError::Io(source)
        | TransportError::Accept(source)
        | TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. } => FrameError::Io(source),
    }
}
