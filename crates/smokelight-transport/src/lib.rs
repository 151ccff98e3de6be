//! TCP transport layer for smokelight.
//!
//! Provides the two socket-level building blocks everything else sits on:
//! - [`TcpConnection`]: one connected duplex byte stream, shared by the
//!   client and server roles
//! - [`TcpTransport`]: a bound listening socket with a pollable accept
//!
//! Framing lives one layer up in `smokelight-frame`.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::TcpConnection;
pub use tcp::TcpTransport;
