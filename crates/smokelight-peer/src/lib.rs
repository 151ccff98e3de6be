//! Client and server endpoints for smokelight.
//!
//! This is the "just works" layer. A [`Client`] holds one connection to a
//! server; a [`Server`] accepts any number of clients and addresses them by
//! [`ConnectionId`]. Both run their loops on background threads and report
//! through [`ClientEvents`] / [`ServerEvents`].
//!
//! ```no_run
//! use smokelight_frame::Payload;
//! use smokelight_peer::{Client, ConnectionId, Server, ServerEvents, ServerHandle};
//!
//! struct Echo;
//!
//! impl ServerEvents for Echo {
//!     fn on_payloads_received(
//!         &self,
//!         server: &ServerHandle,
//!         id: ConnectionId,
//!         payloads: Vec<Payload>,
//!     ) {
//!         let _ = server.send_payloads_to(id, &payloads);
//!     }
//! }
//!
//! let server = Server::new(12345, Echo);
//! server.start()?;
//!
//! let client = Client::new(());
//! client.connect(("127.0.0.1", 12345))?;
//! client.send(&Payload::text("echo", "hello world"))?;
//! # Ok::<(), smokelight_peer::PeerError>(())
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod registry;
pub mod server;

pub use client::{Client, ClientHandle, ClientState};
pub use config::{ClientConfig, ConnectionConfig, ServerConfig};
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use error::{PeerError, Result};
pub use events::{ClientEvent, ClientEvents, ServerEvent, ServerEvents};
pub use registry::ConnectionRegistry;
pub use server::{BroadcastReport, Server, ServerHandle, ServerState};
