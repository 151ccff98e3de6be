//! Relay server plus two scripted clients in one process.
//!
//! Every pack a client sends is broadcast to all connected clients.
//!
//! Run with:
//!   cargo run --example chat-relay

use std::net::{IpAddr, Ipv4Addr};
use std::sync::mpsc;
use std::time::Duration;

use smokelight::peer::{
    Client, ClientEvent, ConnectionId, Server, ServerEvents, ServerHandle,
};
use smokelight::Payload;

struct Relay;

impl ServerEvents for Relay {
    fn on_payloads_received(
        &self,
        server: &ServerHandle,
        id: ConnectionId,
        payloads: Vec<Payload>,
    ) {
        match server.broadcast_payloads(&payloads) {
            Ok(report) if !report.is_complete() => {
                eprintln!("relay from {id}: {} targets failed", report.failed.len())
            }
            Ok(_) => {}
            Err(err) => eprintln!("relay from {id} failed: {err}"),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::with_bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, Relay);
    server.start()?;
    let addr = server
        .local_addr()
        .ok_or("server did not report a listening address")?;
    eprintln!("Relay listening on {addr}");

    let (alice_tx, alice_rx) = mpsc::channel();
    let alice = Client::new(alice_tx);
    alice.connect(addr)?;

    let (bob_tx, bob_rx) = mpsc::channel();
    let bob = Client::new(bob_tx);
    bob.connect(addr)?;

    // Both clients must be registered before the first broadcast.
    while server.client_count() < 2 {
        std::thread::sleep(Duration::from_millis(10));
    }

    alice.send_payloads(&[
        Payload::text("from", "alice"),
        Payload::text("message", "hi bob"),
    ])?;

    for (who, rx) in [("alice", &alice_rx), ("bob", &bob_rx)] {
        loop {
            match rx.recv_timeout(Duration::from_secs(5))? {
                ClientEvent::PayloadsReceived(payloads) => {
                    let text: Vec<_> = payloads.iter().filter_map(Payload::text_data).collect();
                    println!("{who} got: {}", text.join(" | "));
                    break;
                }
                _ => continue,
            }
        }
    }

    alice.disconnect();
    bob.disconnect();
    server.stop();
    Ok(())
}
