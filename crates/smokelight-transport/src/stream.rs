use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};

/// A connected TCP stream implementing `Read` and `Write`.
///
/// This is the fundamental I/O type returned by transport operations. Both
/// the client and the server side of a connection use it identically.
/// Reads and writes may happen on clones obtained via [`try_clone`], and
/// [`shutdown`] may be called from any clone to unblock a pending read.
///
/// [`try_clone`]: TcpConnection::try_clone
/// [`shutdown`]: TcpConnection::shutdown
pub struct TcpConnection {
    inner: TcpStream,
}

impl Read for TcpConnection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for TcpConnection {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl TcpConnection {
    /// Wrap an already-connected std stream.
    pub(crate) fn from_std(stream: TcpStream) -> Self {
        Self { inner: stream }
    }

    /// Connect to a listening peer (blocking).
    ///
    /// Every address `addr` resolves to is tried in order; the last failure
    /// is reported if none succeeds.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        Self::connect_with_timeout(addr, None)
    }

    /// Connect with an optional per-address timeout.
    pub fn connect_with_timeout(
        addr: impl ToSocketAddrs,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let addrs: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|source| TransportError::Connect {
                addr: "<unresolved>".to_string(),
                source,
            })?
            .collect();

        let mut last_err = None;
        for candidate in &addrs {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(candidate, timeout),
                None => TcpStream::connect(candidate),
            };
            match attempt {
                Ok(stream) => {
                    debug!(addr = %candidate, "connected to tcp peer");
                    return Ok(Self::from_std(stream));
                }
                Err(err) => last_err = Some((*candidate, err)),
            }
        }

        Err(match last_err {
            Some((addr, source)) => TransportError::Connect {
                addr: addr.to_string(),
                source,
            },
            None => TransportError::Connect {
                addr: "<none>".to_string(),
                source: std::io::Error::new(
                    ErrorKind::InvalidInput,
                    "address resolved to no socket addresses",
                ),
            },
        })
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Disable Nagle's algorithm so small frames are sent immediately.
    pub fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        self.inner.set_nodelay(nodelay).map_err(Into::into)
    }

    /// Try to clone this stream (creates a new socket handle).
    pub fn try_clone(&self) -> Result<Self> {
        let cloned = self.inner.try_clone()?;
        Ok(Self::from_std(cloned))
    }

    /// Shut down both directions of the stream.
    ///
    /// Idempotent: shutting down an already-closed socket is not an error.
    /// Any read blocked on another clone of this stream returns immediately.
    pub fn shutdown(&self) -> Result<()> {
        match self.inner.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.inner.peer_addr().map_err(Into::into)
    }

    /// Address of the local end.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(Into::into)
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = f.debug_struct("TcpConnection");
        if let Ok(local) = self.inner.local_addr() {
            dbg.field("local", &local);
        }
        if let Ok(peer) = self.inner.peer_addr() {
            dbg.field("peer", &peer);
        }
        dbg.finish()
    }
}
