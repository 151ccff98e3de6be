use std::cell::Cell;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use smokelight_frame::{pack, packed_len, FrameError, PackReader, Payload};
use smokelight_transport::{TcpConnection, TcpTransport, TransportError};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::{join_loop, run_receive_loop, Connection, ConnectionId, LoopExit};
use crate::error::{PeerError, Result};
use crate::events::ServerEvents;
use crate::registry::ConnectionRegistry;

/// Lifecycle of a [`Server`]'s listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Listening,
    /// `stop()` is closing the listener and connections.
    Stopping,
}

/// Outcome of a broadcast, per target.
///
/// Targets are the connections registered when the broadcast began. A
/// failure on one target never prevents delivery to the others.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<ConnectionId>,
    pub failed: Vec<(ConnectionId, PeerError)>,
}

impl BroadcastReport {
    /// Number of connections the broadcast was attempted on.
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    /// `true` if every target received the pack.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct ServerShared {
    config: ServerConfig,
    events: Arc<dyn ServerEvents>,
    state: Mutex<ServerState>,
    /// Signalled when `stop` reaches `Stopped`.
    stopped: Condvar,
    local_addr: Mutex<Option<SocketAddr>>,
    registry: ConnectionRegistry,
    acceptor: Mutex<Option<JoinHandle<()>>>,
    receivers: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

thread_local! {
    /// Address of the server whose accept or receive loop runs on this thread.
    static LOOP_OWNER: Cell<usize> = const { Cell::new(0) };
}

/// A cloneable reference to a server.
///
/// Notification handlers receive one and may call `send_to`, `broadcast`
/// or `stop` from inside the callback.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<ServerShared>,
}

impl ServerHandle {
    /// Bind the listener and start accepting in the background.
    ///
    /// Returns once the socket is listening; use [`local_addr`](Self::local_addr)
    /// to learn the port when binding to port `0`.
    pub fn start(&self) -> Result<()> {
        // Held until the accept thread is stored so `stop` can't miss it.
        let mut acceptor = lock(&self.shared.acceptor);
        {
            let state = lock(&self.shared.state);
            if *state != ServerState::Stopped {
                return Err(PeerError::AlreadyRunning("server"));
            }
        }
        if let Some(previous) = acceptor.take() {
            join_loop(previous);
        }

        let transport = TcpTransport::bind(self.shared.config.bind_address)?;
        transport.set_nonblocking(true)?;
        let local_addr = transport.local_addr();
        *lock(&self.shared.local_addr) = Some(local_addr);
        *lock(&self.shared.state) = ServerState::Listening;

        let handle = self.clone();
        let spawned = thread::Builder::new()
            .name("smokelight-accept".to_string())
            .spawn(move || handle.accept_loop(transport));

        match spawned {
            Ok(join) => {
                *acceptor = Some(join);
                info!(addr = %local_addr, "server listening");
                Ok(())
            }
            Err(err) => {
                *lock(&self.shared.local_addr) = None;
                *lock(&self.shared.state) = ServerState::Stopped;
                Err(PeerError::Connection(TransportError::Io(err)))
            }
        }
    }

    fn owner_key(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }

    fn enter_loop(&self) {
        LOOP_OWNER.with(|owner| owner.set(self.owner_key()));
    }

    fn on_loop_thread(&self) -> bool {
        LOOP_OWNER.with(|owner| owner.get() == self.owner_key())
    }

    fn accept_loop(self, transport: TcpTransport) {
        self.enter_loop();
        let idle = self.shared.config.accept_poll_interval;
        while self.state() == ServerState::Listening {
            match transport.try_accept() {
                Ok(Some(stream)) => self.admit(stream),
                Ok(None) => thread::sleep(idle),
                Err(err) => {
                    warn!(error = %err, "accept failed, retrying");
                    thread::sleep(idle);
                }
            }
        }
        debug!(addr = %transport.local_addr(), "accept loop stopped");
    }

    fn admit(&self, stream: TcpConnection) {
        let (conn, reader) = match Connection::open(stream, &self.shared.config.connection) {
            Ok(opened) => opened,
            Err(err) => {
                warn!(error = %err, "failed to set up accepted connection");
                return;
            }
        };
        let id = conn.id();
        self.shared.registry.insert(Arc::clone(&conn));
        info!(client_id = %id, peer = ?conn.peer_addr(), "client connected");
        self.shared.events.on_client_connected(self, id);

        let handle = self.clone();
        let loop_conn = Arc::clone(&conn);
        let spawned = thread::Builder::new()
            .name(format!("smokelight-conn-{id}"))
            .spawn(move || handle.receive(loop_conn, reader));

        match spawned {
            Ok(join) => {
                let mut receivers = lock(&self.shared.receivers);
                receivers.retain(|receiver| !receiver.is_finished());
                receivers.push(join);
            }
            Err(err) => {
                warn!(client_id = %id, error = %err, "failed to spawn receive thread");
                self.release(&conn);
            }
        }
    }

    fn receive(self, conn: Arc<Connection>, mut reader: PackReader<TcpConnection>) {
        self.enter_loop();
        let id = conn.id();
        let exit = run_receive_loop(&conn, &mut reader, |payloads| {
            self.shared.events.on_payloads_received(&self, id, payloads);
        });
        match &exit {
            LoopExit::Closed => debug!(client_id = %id, "receive loop stopped"),
            LoopExit::PeerClosed => debug!(client_id = %id, "client closed connection"),
            LoopExit::Failed(err) => debug!(client_id = %id, error = %err, "receive loop failed"),
        }
        drop(reader);
        self.release(&conn);
    }

    fn release(&self, conn: &Connection) {
        let id = conn.id();
        self.shared.registry.remove(id);
        conn.close();
        conn.mark_disconnected();
        info!(client_id = %id, "client disconnected");
        self.shared.events.on_client_disconnected(self, id);
    }

    /// Send one payload to one client.
    pub fn send_to(&self, id: ConnectionId, payload: &Payload) -> Result<()> {
        self.send_payloads_to(id, std::slice::from_ref(payload))
    }

    /// Send `payloads` as one pack to one client.
    ///
    /// Fails with [`PeerError::UnknownTarget`] if `id` is not registered,
    /// which includes clients that have just disconnected.
    pub fn send_payloads_to(&self, id: ConnectionId, payloads: &[Payload]) -> Result<()> {
        let conn = self
            .shared
            .registry
            .get(id)
            .ok_or(PeerError::UnknownTarget(id))?;
        conn.send_payloads(payloads)
    }

    /// Send one payload to every connected client.
    pub fn broadcast(&self, payload: &Payload) -> Result<BroadcastReport> {
        self.broadcast_payloads(std::slice::from_ref(payload))
    }

    /// Send `payloads` as one pack to every connected client.
    ///
    /// The pack is encoded once and written to all targets concurrently.
    /// Only encoding fails the call as a whole; write failures are recorded
    /// per target in the report.
    pub fn broadcast_payloads(&self, payloads: &[Payload]) -> Result<BroadcastReport> {
        let max = self.shared.config.connection.max_frame_size;
        let size = packed_len(payloads);
        if size > max {
            return Err(FrameError::FrameTooLarge { size, max }.into());
        }
        let frame = pack(payloads)?;
        let targets = self.shared.registry.snapshot();

        let results: Vec<(ConnectionId, Result<()>)> = if targets.len() <= 1 {
            targets
                .iter()
                .map(|conn| (conn.id(), conn.send_encoded(&frame)))
                .collect()
        } else {
            thread::scope(|scope| {
                let writers: Vec<_> = targets
                    .iter()
                    .map(|conn| {
                        let frame = &frame[..];
                        let spawned = thread::Builder::new()
                            .name(format!("smokelight-broadcast-{}", conn.id()))
                            .spawn_scoped(scope, move || conn.send_encoded(frame));
                        (conn, spawned)
                    })
                    .collect();

                writers
                    .into_iter()
                    .map(|(conn, spawned)| {
                        let outcome = match spawned {
                            Ok(writer) => writer.join().unwrap_or(Err(PeerError::NotConnected)),
                            // No thread to spare; write from here instead.
                            Err(_) => conn.send_encoded(&frame),
                        };
                        (conn.id(), outcome)
                    })
                    .collect()
            })
        };

        let mut report = BroadcastReport::default();
        for (id, outcome) in results {
            match outcome {
                Ok(()) => report.delivered.push(id),
                Err(err) => {
                    warn!(client_id = %id, error = %err, "broadcast to client failed");
                    report.failed.push((id, err));
                }
            }
        }
        debug!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            bytes = frame.len(),
            "broadcast finished"
        );
        Ok(report)
    }

    /// Close one client's connection.
    ///
    /// Its receive loop ends and `on_client_disconnected` follows shortly.
    pub fn disconnect_client(&self, id: ConnectionId) -> Result<()> {
        let conn = self
            .shared
            .registry
            .get(id)
            .ok_or(PeerError::UnknownTarget(id))?;
        conn.close();
        Ok(())
    }

    /// Stop accepting, close every connection and wait for all loops to end.
    ///
    /// Idempotent. A call made while another `stop` is in progress waits for
    /// that one to finish. When called from a notification handler, the
    /// handler's own loop is not waited for; it ends right after the handler
    /// returns.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.shared.state);
            match *state {
                ServerState::Listening => *state = ServerState::Stopping,
                ServerState::Stopping if !self.on_loop_thread() => {
                    while *state == ServerState::Stopping {
                        state = self
                            .shared
                            .stopped
                            .wait(state)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                    return;
                }
                _ => return,
            }
        }
        info!("server stopping");

        let acceptor = lock(&self.shared.acceptor).take();
        if let Some(acceptor) = acceptor {
            join_loop(acceptor);
        }

        // Connections may leave the registry while we iterate; that's fine.
        for conn in self.shared.registry.snapshot() {
            conn.close();
        }

        let receivers = std::mem::take(&mut *lock(&self.shared.receivers));
        for receiver in receivers {
            join_loop(receiver);
        }

        *lock(&self.shared.local_addr) = None;
        *lock(&self.shared.state) = ServerState::Stopped;
        self.shared.stopped.notify_all();
        info!("server stopped");
    }

    pub fn state(&self) -> ServerState {
        *lock(&self.shared.state)
    }

    pub fn is_listening(&self) -> bool {
        self.state() == ServerState::Listening
    }

    /// Bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.shared.local_addr)
    }

    pub fn client_ids(&self) -> Vec<ConnectionId> {
        self.shared.registry.ids()
    }

    pub fn client_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Remote address of a connected client.
    pub fn client_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.shared.registry.get(id).and_then(|conn| conn.peer_addr())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("clients", &self.client_count())
            .finish()
    }
}

/// A Smokelight server: one listener, many client connections.
///
/// Dropping the server stops it.
pub struct Server {
    handle: ServerHandle,
}

impl Server {
    /// Server on all IPv4 interfaces at `port`.
    pub fn new(port: u16, events: impl ServerEvents) -> Self {
        Self::with_config(ServerConfig::new(port), events)
    }

    pub fn with_bind_address(address: IpAddr, port: u16, events: impl ServerEvents) -> Self {
        Self::with_config(ServerConfig::with_bind_address(address, port), events)
    }

    pub fn with_config(config: ServerConfig, events: impl ServerEvents) -> Self {
        let shared = ServerShared {
            config,
            events: Arc::new(events),
            state: Mutex::new(ServerState::Stopped),
            stopped: Condvar::new(),
            local_addr: Mutex::new(None),
            registry: ConnectionRegistry::new(),
            acceptor: Mutex::new(None),
            receivers: Mutex::new(Vec::new()),
        };
        Self {
            handle: ServerHandle {
                shared: Arc::new(shared),
            },
        }
    }

    /// A cloneable handle for use from other threads.
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }
}

impl Deref for Server {
    type Target = ServerHandle;

    fn deref(&self) -> &ServerHandle {
        &self.handle
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.handle, f)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.stop();
    }
}
