use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use smokelight_frame::Payload;
use smokelight_peer::{ConnectionId, Server, ServerEvents, ServerHandle};

use crate::cmd::{install_ctrlc_handler, wait_for_interrupt, EchoArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};

/// Replies to every pack with the same payloads, on the receiving thread.
struct EchoEvents;

impl ServerEvents for EchoEvents {
    fn on_payloads_received(
        &self,
        server: &ServerHandle,
        id: ConnectionId,
        payloads: Vec<Payload>,
    ) {
        tracing::info!(client_id = %id, payloads = payloads.len(), "echoing pack");
        if let Err(err) = server.send_payloads_to(id, &payloads) {
            tracing::warn!(client_id = %id, error = %err, "echo send failed");
        }
    }
}

pub fn run(args: EchoArgs) -> CliResult<i32> {
    let server = Server::with_config(args.serve.server_config(), EchoEvents);
    server
        .start()
        .map_err(|err| peer_error("start failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    wait_for_interrupt(&running);

    server.stop();
    Ok(SUCCESS)
}
