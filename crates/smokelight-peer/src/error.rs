use crate::connection::ConnectionId;

/// Errors that can occur in client and server operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Connect, bind or accept failed.
    #[error("connection error: {0}")]
    Connection(#[from] smokelight_transport::TransportError),

    /// The connection is closed, closing, or was never opened.
    #[error("not connected")]
    NotConnected,

    /// No live connection is registered under this id.
    #[error("unknown client {0}")]
    UnknownTarget(ConnectionId),

    /// Pack encoding, decoding or frame-level I/O failed.
    #[error("frame error: {0}")]
    Frame(#[from] smokelight_frame::FrameError),

    /// The endpoint is already connected or listening.
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),
}

pub type Result<T> = std::result::Result<T, PeerError>;
