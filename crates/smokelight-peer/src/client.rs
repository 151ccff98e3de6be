use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use smokelight_frame::{PackReader, Payload};
use smokelight_transport::{TcpConnection, TransportError};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connection::{join_loop, run_receive_loop, Connection, LoopExit};
use crate::error::{PeerError, Result};
use crate::events::ClientEvents;

/// Lifecycle of a [`Client`].
///
/// `Disconnected → Connecting → Connected → Disconnecting → Disconnected`.
/// A failed connect goes straight back to `Disconnected`; a peer that closes
/// the stream skips `Disconnecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

struct Session {
    state: ClientState,
    connection: Option<Arc<Connection>>,
}

struct ClientShared {
    config: ClientConfig,
    events: Arc<dyn ClientEvents>,
    session: Mutex<Session>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl ClientShared {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn receiver(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.receiver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the previous receive thread to finish.
    ///
    /// The slot lock is released before joining, so a handler on that thread
    /// can still reach this method. Called from the receive thread itself,
    /// the handle stays in place for the next outside caller to join.
    fn reap_receiver(&self) {
        let handle = {
            let mut slot = self.receiver();
            match slot.as_ref() {
                Some(handle) if handle.thread().id() == thread::current().id() => None,
                _ => slot.take(),
            }
        };
        if let Some(handle) = handle {
            join_loop(handle);
        }
    }
}

/// A cloneable reference to a client.
///
/// Notification handlers receive one, and may call any method on it,
/// including `send` and `disconnect`, from inside the callback.
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<ClientShared>,
}

impl ClientHandle {
    /// Connect to a server and start receiving.
    ///
    /// On success the state is `Connected`, `on_connected` has been raised,
    /// and a receive thread is running for this connection. On failure the
    /// client stays `Disconnected`.
    pub fn connect(&self, addr: impl ToSocketAddrs) -> Result<()> {
        {
            let mut session = self.shared.session();
            if session.state != ClientState::Disconnected {
                return Err(PeerError::AlreadyRunning("client"));
            }
            session.state = ClientState::Connecting;
        }
        self.shared.reap_receiver();

        let (conn, reader) = match self.open(addr) {
            Ok(opened) => opened,
            Err(err) => {
                self.shared.session().state = ClientState::Disconnected;
                return Err(err);
            }
        };

        {
            let mut session = self.shared.session();
            session.state = ClientState::Connected;
            session.connection = Some(Arc::clone(&conn));
        }
        info!(client_id = %conn.id(), peer = ?conn.peer_addr(), "client connected");
        self.shared.events.on_connected(self);

        // Held across the spawn so a concurrent disconnect can't miss the handle.
        let mut slot = self.shared.receiver();
        let handle = self.clone();
        let id = conn.id();
        let loop_conn = Arc::clone(&conn);
        let spawned = thread::Builder::new()
            .name(format!("smokelight-client-{id}"))
            .spawn(move || handle.receive(loop_conn, reader));

        match spawned {
            Ok(join) => {
                *slot = Some(join);
                Ok(())
            }
            Err(err) => {
                drop(slot);
                conn.close();
                conn.mark_disconnected();
                {
                    let mut session = self.shared.session();
                    session.state = ClientState::Disconnected;
                    session.connection = None;
                }
                self.shared.events.on_disconnected(self);
                Err(PeerError::Connection(TransportError::Io(err)))
            }
        }
    }

    fn open(
        &self,
        addr: impl ToSocketAddrs,
    ) -> Result<(Arc<Connection>, PackReader<TcpConnection>)> {
        let stream = TcpConnection::connect_with_timeout(addr, self.shared.config.connect_timeout)?;
        Connection::open(stream, &self.shared.config.connection)
    }

    fn receive(self, conn: Arc<Connection>, mut reader: PackReader<TcpConnection>) {
        let exit = run_receive_loop(&conn, &mut reader, |payloads| {
            self.shared.events.on_payloads_received(&self, payloads);
        });
        match &exit {
            LoopExit::Closed => debug!(client_id = %conn.id(), "receive loop stopped"),
            LoopExit::PeerClosed => debug!(client_id = %conn.id(), "server closed connection"),
            LoopExit::Failed(err) => {
                debug!(client_id = %conn.id(), error = %err, "receive loop failed")
            }
        }

        conn.close();
        drop(reader);
        conn.mark_disconnected();
        {
            let mut session = self.shared.session();
            session.state = ClientState::Disconnected;
            session.connection = None;
        }
        info!(client_id = %conn.id(), "client disconnected");
        self.shared.events.on_disconnected(&self);
    }

    /// Close the connection and stop the receive thread.
    ///
    /// Idempotent. Unless called from a notification handler, the receive
    /// thread has exited and `on_disconnected` has been raised when this
    /// returns.
    pub fn disconnect(&self) {
        let conn = {
            let mut session = self.shared.session();
            if session.state == ClientState::Connected {
                session.state = ClientState::Disconnecting;
                session.connection.clone()
            } else {
                None
            }
        };
        if let Some(conn) = conn {
            debug!(client_id = %conn.id(), "disconnect requested");
            conn.close();
        }
        self.shared.reap_receiver();
    }

    /// Send one payload as its own pack.
    pub fn send(&self, payload: &Payload) -> Result<()> {
        self.live_connection()?.send(payload)
    }

    /// Send `payloads` together as one pack.
    pub fn send_payloads(&self, payloads: &[Payload]) -> Result<()> {
        self.live_connection()?.send_payloads(payloads)
    }

    pub fn state(&self) -> ClientState {
        self.shared.session().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Address of the server while connected.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared
            .session()
            .connection
            .as_ref()
            .and_then(|conn| conn.peer_addr())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    fn live_connection(&self) -> Result<Arc<Connection>> {
        let session = self.shared.session();
        match (&session.state, &session.connection) {
            (ClientState::Connected, Some(conn)) => Ok(Arc::clone(conn)),
            _ => Err(PeerError::NotConnected),
        }
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr())
            .finish()
    }
}

/// A Smokelight client: one outgoing connection at a time.
///
/// Owns its socket. Dropping the client disconnects it.
pub struct Client {
    handle: ClientHandle,
}

impl Client {
    pub fn new(events: impl ClientEvents) -> Self {
        Self::with_config(ClientConfig::default(), events)
    }

    pub fn with_config(config: ClientConfig, events: impl ClientEvents) -> Self {
        let shared = ClientShared {
            config,
            events: Arc::new(events),
            session: Mutex::new(Session {
                state: ClientState::Disconnected,
                connection: None,
            }),
            receiver: Mutex::new(None),
        };
        Self {
            handle: ClientHandle {
                shared: Arc::new(shared),
            },
        }
    }

    /// A cloneable handle for use from other threads.
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }
}

impl Deref for Client {
    type Target = ClientHandle;

    fn deref(&self) -> &ClientHandle {
        &self.handle
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.handle, f)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.handle.disconnect();
    }
}
