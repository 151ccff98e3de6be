use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use smokelight_transport::TcpConnection;

use crate::codec::{encode_pack, packed_len, FrameConfig};
use crate::error::{FrameError, Result};
use crate::payload::Payload;
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete packs to any `Write` stream.
pub struct PackWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> PackWriter<T> {
    /// Create a new pack writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new pack writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and write one payload as a single-entry pack.
    pub fn send(&mut self, payload: &Payload) -> Result<()> {
        self.write_pack(std::slice::from_ref(payload))
    }

    /// Encode and write a batch of payloads as one pack (blocking).
    pub fn write_pack(&mut self, payloads: &[Payload]) -> Result<()> {
        let size = packed_len(payloads);
        if size > self.config.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size,
                max: self.config.max_frame_size,
            });
        }

        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        encode_pack(payloads, &mut buf)?;
        let result = self.write_encoded(&buf);
        self.buf = buf;
        result
    }

    /// Write an already encoded pack.
    ///
    /// Used to send one encoding to many connections. The bytes are written
    /// as-is; callers are expected to pass the output of [`crate::pack`].
    pub fn write_encoded(&mut self, frame: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < frame.len() {
            match self.inner.write(&frame[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum frame size for subsequent encoding.
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.config.max_frame_size = max_frame_size;
    }

    /// Current pack writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl PackWriter<TcpConnection> {
    /// Create a pack writer for `TcpConnection` and apply write timeout from config.
    pub fn with_config_tcp(inner: TcpConnection, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
