use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use smokelight_frame::Payload;
use smokelight_peer::{ConnectionId, Server, ServerEvents, ServerHandle};

use crate::cmd::{install_ctrlc_handler, wait_for_interrupt, RelayArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};

/// Broadcasts every pack to all connected clients, sender included.
struct RelayEvents;

impl ServerEvents for RelayEvents {
    fn on_client_connected(&self, server: &ServerHandle, id: ConnectionId) {
        tracing::info!(client_id = %id, clients = server.client_count(), "client joined relay");
    }

    fn on_client_disconnected(&self, server: &ServerHandle, id: ConnectionId) {
        tracing::info!(client_id = %id, clients = server.client_count(), "client left relay");
    }

    fn on_payloads_received(
        &self,
        server: &ServerHandle,
        id: ConnectionId,
        payloads: Vec<Payload>,
    ) {
        match server.broadcast_payloads(&payloads) {
            Ok(report) => tracing::debug!(
                client_id = %id,
                delivered = report.delivered.len(),
                failed = report.failed.len(),
                "relayed pack"
            ),
            Err(err) => tracing::warn!(client_id = %id, error = %err, "relay failed"),
        }
    }
}

pub fn run(args: RelayArgs) -> CliResult<i32> {
    let server = Server::with_config(args.serve.server_config(), RelayEvents);
    server
        .start()
        .map_err(|err| peer_error("start failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    wait_for_interrupt(&running);

    server.stop();
    Ok(SUCCESS)
}
