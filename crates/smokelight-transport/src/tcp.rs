use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::TcpConnection;

/// TCP listening socket.
///
/// Provides bind/accept over IPv4 or IPv6. The listener can be switched to
/// non-blocking mode so an accept loop can poll it and observe a stop
/// request between attempts.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on the given address.
    ///
    /// Port `0` asks the OS for an ephemeral port; use [`local_addr`] to
    /// find out which one was assigned.
    ///
    /// [`local_addr`]: TcpTransport::local_addr
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        info!(%local_addr, "listening on tcp socket");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Switch the listener between blocking and non-blocking accept.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener
            .set_nonblocking(nonblocking)
            .map_err(Into::into)
    }

    /// Accept an incoming connection (blocking unless non-blocking mode is set).
    pub fn accept(&self) -> Result<TcpConnection> {
        let (stream, addr) = self.listener.accept().map_err(TransportError::Accept)?;
        // Accepted sockets may inherit the listener's non-blocking flag.
        stream.set_nonblocking(false).map_err(TransportError::Accept)?;
        debug!(peer = %addr, "accepted connection");
        Ok(TcpConnection::from_std(stream))
    }

    /// Poll for an incoming connection.
    ///
    /// Returns `Ok(None)` when the listener is non-blocking and nothing is
    /// pending.
    pub fn try_accept(&self) -> Result<Option<TcpConnection>> {
        match self.accept() {
            Ok(conn) => Ok(Some(conn)),
            Err(TransportError::Accept(err)) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// The address this socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}
