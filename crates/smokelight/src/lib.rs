//! Named text and binary payloads over TCP.
//!
//! smokelight moves batches of named payloads between a client and a
//! multi-client server. Every batch travels as one SLPK pack: a small
//! length-prefixed frame holding zero or more payloads.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP streams and listeners
//! - [`frame`]: `Payload`, the pack codec, blocking pack reader/writer and
//!   an optional tokio codec (behind `async` feature)
//! - [`peer`]: `Client`, `Server` and their event traits (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use smokelight_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use smokelight_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use smokelight_peer::*;
}

pub use smokelight_frame::{Payload, PayloadType};
