//! Minimal echo server: every pack goes back to the client that sent it.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- send 127.0.0.1:12345 \
//!     --name echo --text "hello world" --wait

use std::sync::mpsc;

use smokelight::peer::{ConnectionId, Server, ServerEvents, ServerHandle};
use smokelight::Payload;

struct Echo {
    done: mpsc::Sender<()>,
}

impl ServerEvents for Echo {
    fn on_client_connected(&self, server: &ServerHandle, id: ConnectionId) {
        eprintln!("Client connected: {id} from {:?}", server.client_addr(id));
    }

    fn on_client_disconnected(&self, _server: &ServerHandle, id: ConnectionId) {
        eprintln!("Client disconnected: {id}");
    }

    fn on_payloads_received(
        &self,
        server: &ServerHandle,
        id: ConnectionId,
        payloads: Vec<Payload>,
    ) {
        for payload in &payloads {
            eprintln!(
                "Received {} ({} bytes) from {id}",
                payload.name(),
                payload.data().len()
            );
        }
        if payloads.iter().any(|p| p.text_data() == Some("quit")) {
            let _ = self.done.send(());
        }
        if let Err(err) = server.send_payloads_to(id, &payloads) {
            eprintln!("Echo to {id} failed: {err}");
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (done_tx, done_rx) = mpsc::channel();
    let server = Server::new(12345, Echo { done: done_tx });
    server.start()?;
    eprintln!(
        "Listening on {} (send a text payload \"quit\" to stop)",
        server.local_addr().map(|a| a.to_string()).unwrap_or_default()
    );

    let _ = done_rx.recv();
    server.stop();
    Ok(())
}
