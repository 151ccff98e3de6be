//! Lifecycle and receive notifications.
//!
//! Applications observe a [`Client`](crate::Client) or [`Server`](crate::Server)
//! by implementing [`ClientEvents`] / [`ServerEvents`]. Every method has an
//! empty default, so observers only override what they care about.
//!
//! Callbacks run on the endpoint's own threads: connect notifications on the
//! connecting or accepting thread, receive and disconnect notifications on the
//! connection's receive thread. Payloads of one connection are delivered in
//! wire order, one pack at a time. A slow callback delays further reads from
//! that connection only.
//!
//! For a pull-style API, `std::sync::mpsc::Sender<ClientEvent>` and
//! `Sender<ServerEvent>` implement the traits by forwarding every
//! notification into the channel.

use std::sync::mpsc::Sender;

use smokelight_frame::Payload;

use crate::client::ClientHandle;
use crate::connection::ConnectionId;
use crate::server::ServerHandle;

/// Observer of one client's connection.
pub trait ClientEvents: Send + Sync + 'static {
    fn on_connected(&self, _client: &ClientHandle) {}

    fn on_disconnected(&self, _client: &ClientHandle) {}

    fn on_payloads_received(&self, _client: &ClientHandle, _payloads: Vec<Payload>) {}
}

/// Observer of a server and all its clients.
pub trait ServerEvents: Send + Sync + 'static {
    fn on_client_connected(&self, _server: &ServerHandle, _id: ConnectionId) {}

    fn on_client_disconnected(&self, _server: &ServerHandle, _id: ConnectionId) {}

    fn on_payloads_received(
        &self,
        _server: &ServerHandle,
        _id: ConnectionId,
        _payloads: Vec<Payload>,
    ) {
    }
}

impl ClientEvents for () {}

impl ServerEvents for () {}

/// Client notification delivered through a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    PayloadsReceived(Vec<Payload>),
}

/// Server notification delivered through a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnected(ConnectionId),
    ClientDisconnected(ConnectionId),
    PayloadsReceived(ConnectionId, Vec<Payload>),
}

// A dropped receiver means nobody is listening anymore; events are discarded.

impl ClientEvents for Sender<ClientEvent> {
    fn on_connected(&self, _client: &ClientHandle) {
        let _ = self.send(ClientEvent::Connected);
    }

    fn on_disconnected(&self, _client: &ClientHandle) {
        let _ = self.send(ClientEvent::Disconnected);
    }

    fn on_payloads_received(&self, _client: &ClientHandle, payloads: Vec<Payload>) {
        let _ = self.send(ClientEvent::PayloadsReceived(payloads));
    }
}

impl ServerEvents for Sender<ServerEvent> {
    fn on_client_connected(&self, _server: &ServerHandle, id: ConnectionId) {
        let _ = self.send(ServerEvent::ClientConnected(id));
    }

    fn on_client_disconnected(&self, _server: &ServerHandle, id: ConnectionId) {
        let _ = self.send(ServerEvent::ClientDisconnected(id));
    }

    fn on_payloads_received(
        &self,
        _server: &ServerHandle,
        id: ConnectionId,
        payloads: Vec<Payload>,
    ) {
        let _ = self.send(ServerEvent::PayloadsReceived(id, payloads));
    }
}
