use std::fmt;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use smokelight_frame::{FrameError, PackReader, PackWriter, Payload};
use smokelight_transport::TcpConnection;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::error::{PeerError, Result};

/// Unique identity of one connection, assigned when it is opened.
///
/// Random (v4) so ids are never reused, even across server restarts.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Lifecycle of a single connection. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connected = 0,
    /// Close requested; the receive loop has not exited yet.
    Disconnecting = 1,
    Disconnected = 2,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Connected,
            1 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Why a receive loop ended. Logged only; the application just sees a
/// disconnect.
#[derive(Debug)]
pub(crate) enum LoopExit {
    /// `close()` was called on this side.
    Closed,
    /// The peer closed the stream between packs or mid-pack.
    PeerClosed,
    /// Malformed pack or I/O failure.
    Failed(FrameError),
}

/// The shared half of one live socket: lifecycle state plus a serialized
/// writer.
///
/// The read half is a [`PackReader`] owned exclusively by the connection's
/// receive loop. Writers on any thread go through an internal lock, so two
/// concurrent sends never interleave their bytes on the wire.
pub struct Connection {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    state: AtomicU8,
    control: TcpConnection,
    writer: Mutex<PackWriter<TcpConnection>>,
}

impl Connection {
    /// Split a connected stream into the shared connection and its reader.
    pub(crate) fn open(
        stream: TcpConnection,
        config: &ConnectionConfig,
    ) -> Result<(Arc<Self>, PackReader<TcpConnection>)> {
        stream.set_nodelay(config.nodelay)?;
        let peer_addr = stream.peer_addr().ok();
        let control = stream.try_clone()?;
        let reader_stream = stream.try_clone()?;

        let frame_config = config.frame_config();
        let reader = PackReader::with_config_tcp(reader_stream, frame_config.clone())?;
        let writer = PackWriter::with_config_tcp(stream, frame_config)?;

        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            peer_addr,
            state: AtomicU8::new(ConnectionState::Connected as u8),
            control,
            writer: Mutex::new(writer),
        });
        debug!(client_id = %conn.id, peer = ?conn.peer_addr, "connection opened");
        Ok((conn, reader))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Send one payload as a single-entry pack.
    pub fn send(&self, payload: &Payload) -> Result<()> {
        self.send_payloads(std::slice::from_ref(payload))
    }

    /// Encode `payloads` into one pack and write it.
    pub fn send_payloads(&self, payloads: &[Payload]) -> Result<()> {
        self.with_writer(|writer| writer.write_pack(payloads))?;
        trace!(client_id = %self.id, payloads = payloads.len(), "pack sent");
        Ok(())
    }

    /// Write an already encoded pack.
    pub fn send_encoded(&self, frame: &[u8]) -> Result<()> {
        self.with_writer(|writer| writer.write_encoded(frame))?;
        trace!(client_id = %self.id, bytes = frame.len(), "encoded pack sent");
        Ok(())
    }

    fn with_writer(
        &self,
        write: impl FnOnce(&mut PackWriter<TcpConnection>) -> smokelight_frame::Result<()>,
    ) -> Result<()> {
        if !self.is_connected() {
            return Err(PeerError::NotConnected);
        }
        let Ok(mut writer) = self.writer.lock() else {
            // A writer panicked mid-pack; the stream can't be trusted.
            self.close();
            return Err(PeerError::NotConnected);
        };
        match write(&mut writer) {
            Ok(()) => Ok(()),
            Err(err @ FrameError::FrameTooLarge { .. }) => Err(err.into()),
            Err(err) => {
                // Part of the pack may be on the wire already.
                drop(writer);
                debug!(client_id = %self.id, error = %err, "write failed, closing connection");
                self.close();
                Err(write_failure(err))
            }
        }
    }

    /// Request the connection to close.
    ///
    /// Idempotent and callable from any thread: shuts the socket down, which
    /// unblocks the receive loop's pending read. Returns `true` for the call
    /// that actually initiated the close.
    pub fn close(&self) -> bool {
        let initiated = self
            .state
            .compare_exchange(
                ConnectionState::Connected as u8,
                ConnectionState::Disconnecting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if let Err(err) = self.control.shutdown() {
            debug!(client_id = %self.id, error = %err, "socket shutdown failed");
        }
        initiated
    }

    /// Final transition, made by the receive loop once it has exited.
    pub(crate) fn mark_disconnected(&self) {
        self.state
            .store(ConnectionState::Disconnected as u8, Ordering::Release);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

/// Drive one connection's receive loop until it closes.
///
/// Each iteration blocks for at most one poll interval; the connection
/// state is re-checked between iterations so a close request is observed
/// even if the socket shutdown did not wake the read.
pub(crate) fn run_receive_loop(
    conn: &Connection,
    reader: &mut PackReader<TcpConnection>,
    mut on_payloads: impl FnMut(Vec<Payload>),
) -> LoopExit {
    loop {
        if !conn.is_connected() {
            return LoopExit::Closed;
        }
        match reader.poll_pack() {
            Ok(Some(payloads)) => {
                trace!(client_id = %conn.id(), payloads = payloads.len(), "pack received");
                on_payloads(payloads);
            }
            Ok(None) => continue,
            Err(_) if !conn.is_connected() => return LoopExit::Closed,
            Err(FrameError::ConnectionClosed) => return LoopExit::PeerClosed,
            Err(err) => return LoopExit::Failed(err),
        }
    }
}

/// Join a loop thread, unless it is the calling thread.
///
/// Notification handlers run on loop threads and may call `disconnect` or
/// `stop`; waiting on themselves would never return.
/// A write that failed because the peer is gone reports the connection as
/// no longer writable.
fn write_failure(err: FrameError) -> PeerError {
    let peer_gone = match &err {
        FrameError::ConnectionClosed => true,
        FrameError::Io(io) => matches!(
            io.kind(),
            ErrorKind::BrokenPipe
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
        ),
        _ => false,
    };
    if peer_gone {
        PeerError::NotConnected
    } else {
        err.into()
    }
}

pub(crate) fn join_loop(handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    let name = handle.thread().name().map(str::to_owned);
    if handle.join().is_err() {
        debug!(thread = ?name, "loop thread panicked");
    }
}
