//! End-to-end client/server scenarios over loopback TCP.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use smokelight_frame::{pack, PackReader, Payload};
use smokelight_peer::{
    Client, ClientConfig, ClientEvent, ClientState, ConnectionConfig, ConnectionId, PeerError,
    Server, ServerConfig, ServerEvent, ServerEvents, ServerHandle,
};
use smokelight_transport::TcpConnection;

const WAIT: Duration = Duration::from_secs(5);

fn connection_config() -> ConnectionConfig {
    ConnectionConfig {
        poll_interval: Duration::from_millis(20),
        ..ConnectionConfig::default()
    }
}

fn server_config() -> ServerConfig {
    ServerConfig {
        connection: connection_config(),
        accept_poll_interval: Duration::from_millis(10),
        ..ServerConfig::with_bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }
}

fn client_config() -> ClientConfig {
    ClientConfig {
        connection: connection_config(),
        connect_timeout: Some(Duration::from_secs(2)),
    }
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

fn next_payloads(rx: &mpsc::Receiver<ClientEvent>) -> Vec<Payload> {
    loop {
        match rx.recv_timeout(WAIT).expect("client event") {
            ClientEvent::PayloadsReceived(payloads) => return payloads,
            ClientEvent::Connected => continue,
            ClientEvent::Disconnected => panic!("disconnected before receiving"),
        }
    }
}

struct Echo;

impl ServerEvents for Echo {
    fn on_payloads_received(
        &self,
        server: &ServerHandle,
        id: ConnectionId,
        payloads: Vec<Payload>,
    ) {
        server.send_payloads_to(id, &payloads).unwrap();
    }
}

fn echo_server() -> (Server, SocketAddr) {
    let server = Server::with_config(server_config(), Echo);
    server.start().unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr)
}

#[test]
fn echo_round_trip() {
    let (_server, addr) = echo_server();
    let (tx, rx) = mpsc::channel();
    let client = Client::with_config(client_config(), tx);

    client.connect(addr).unwrap();
    let sent = Payload::text("echo", "hello world");
    client.send(&sent).unwrap();

    let received = next_payloads(&rx);
    assert_eq!(received, vec![sent]);
    assert_eq!(received[0].text_data(), Some("hello world"));
}

#[test]
fn echo_preserves_batch_order_and_types() {
    let (_server, addr) = echo_server();
    let (tx, rx) = mpsc::channel();
    let client = Client::with_config(client_config(), tx);
    client.connect(addr).unwrap();

    let batch = vec![
        Payload::text("first", "1"),
        Payload::binary("second", vec![0xde, 0xad, 0xbe, 0xef]),
        Payload::text("", ""),
        Payload::binary("empty", Vec::new()),
    ];
    client.send_payloads(&batch).unwrap();
    assert_eq!(next_payloads(&rx), batch);

    for i in 0..20i32 {
        client
            .send(&Payload::binary("seq", i.to_le_bytes().to_vec()))
            .unwrap();
    }
    for i in 0..20i32 {
        assert_eq!(next_payloads(&rx)[0].data(), &i.to_le_bytes());
    }
}

#[derive(Clone, Default)]
struct Tally {
    count: Arc<AtomicUsize>,
    sum: Arc<AtomicI32>,
}

impl ServerEvents for Tally {
    fn on_payloads_received(
        &self,
        _server: &ServerHandle,
        _id: ConnectionId,
        payloads: Vec<Payload>,
    ) {
        for payload in payloads.iter().filter(|p| p.name() == "number") {
            let bytes: [u8; 4] = payload.data().try_into().unwrap();
            self.sum.fetch_add(i32::from_le_bytes(bytes), Ordering::SeqCst);
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn fan_in_from_three_clients() {
    let tally = Tally::default();
    let server = Server::with_config(server_config(), tally.clone());
    server.start().unwrap();
    let addr = server.local_addr().unwrap();

    let inputs = [7i32, -3, 1_000_000];
    let start = Arc::new(Barrier::new(inputs.len()));
    let senders: Vec<_> = inputs
        .iter()
        .map(|&n| {
            let start = Arc::clone(&start);
            thread::spawn(move || {
                let client = Client::with_config(client_config(), ());
                client.connect(addr).unwrap();
                start.wait();
                client
                    .send(&Payload::binary("number", n.to_le_bytes().to_vec()))
                    .unwrap();
                client
            })
        })
        .collect();
    let clients: Vec<Client> = senders.into_iter().map(|s| s.join().unwrap()).collect();

    wait_until("three numbers", || tally.count.load(Ordering::SeqCst) == 3);
    assert_eq!(tally.sum.load(Ordering::SeqCst), inputs.iter().sum::<i32>());
    assert_eq!(server.client_count(), clients.len());
}

#[test]
fn reentry_cycles_leave_no_state_behind() {
    let (server, addr) = echo_server();

    for cycle in 0..3 {
        let (tx, rx) = mpsc::channel();
        let client = Client::with_config(client_config(), tx);
        client.connect(addr).unwrap();

        let sent = Payload::text("cycle", cycle.to_string());
        client.send(&sent).unwrap();
        assert_eq!(next_payloads(&rx), vec![sent]);

        client.disconnect();
        assert_eq!(client.state(), ClientState::Disconnected);
        wait_until("server to drop the client", || server.client_count() == 0);
    }
}

#[test]
fn concurrent_broadcast_reaches_every_client() {
    let (server_tx, server_rx) = mpsc::channel();
    let server = Server::with_config(server_config(), server_tx);
    server.start().unwrap();
    let addr = server.local_addr().unwrap();

    let mut readers = Vec::new();
    for _ in 0..5 {
        let raw = TcpConnection::connect(addr).unwrap();
        assert!(matches!(
            server_rx.recv_timeout(WAIT).unwrap(),
            ServerEvent::ClientConnected(_)
        ));
        readers.push(raw);
    }

    let payloads = vec![Payload::text("news", "all hands"), Payload::binary("n", vec![9])];
    let report = server.broadcast_payloads(&payloads).unwrap();
    assert_eq!(report.delivered.len(), 5);
    assert!(report.is_complete());

    let expected = pack(&payloads).unwrap();
    for raw in readers {
        let mut frame = vec![0u8; expected.len()];
        let mut raw = raw;
        std::io::Read::read_exact(&mut raw, &mut frame).unwrap();
        assert_eq!(frame, expected.to_vec());
    }
}

#[test]
fn broadcast_tolerates_a_departing_client() {
    let (server_tx, server_rx) = mpsc::channel();
    let server = Server::with_config(server_config(), server_tx);
    server.start().unwrap();
    let addr = server.local_addr().unwrap();

    let stay = TcpConnection::connect(addr).unwrap();
    let ServerEvent::ClientConnected(_stay_id) = server_rx.recv_timeout(WAIT).unwrap() else {
        panic!("expected connect");
    };
    let leave = TcpConnection::connect(addr).unwrap();
    let ServerEvent::ClientConnected(leave_id) = server_rx.recv_timeout(WAIT).unwrap() else {
        panic!("expected connect");
    };

    // Close the departing socket behind the server's back, then broadcast
    // until the server has noticed. Every call must succeed as a whole.
    drop(leave);
    let deadline = Instant::now() + WAIT;
    loop {
        let report = server.broadcast(&Payload::text("tick", "")).unwrap();
        assert!(report.attempted() >= 1);
        if !server.client_ids().contains(&leave_id) {
            break;
        }
        assert!(Instant::now() < deadline, "departed client never released");
        thread::sleep(Duration::from_millis(10));
    }

    let report = server.broadcast(&Payload::text("final", "")).unwrap();
    assert_eq!(report.delivered.len(), 1);

    let mut reader = PackReader::new(stay);
    let mut last = Vec::new();
    while last.first().map(Payload::name) != Some("final") {
        last = reader.read_pack().unwrap();
    }
}

#[test]
fn send_to_departed_client_is_unknown_target() {
    let (server_tx, server_rx) = mpsc::channel();
    let server = Server::with_config(server_config(), server_tx);
    server.start().unwrap();

    let client = Client::with_config(client_config(), ());
    client.connect(server.local_addr().unwrap()).unwrap();
    let ServerEvent::ClientConnected(id) = server_rx.recv_timeout(WAIT).unwrap() else {
        panic!("expected connect");
    };

    client.disconnect();
    assert_eq!(
        server_rx.recv_timeout(WAIT).unwrap(),
        ServerEvent::ClientDisconnected(id)
    );

    let err = server.send_to(id, &Payload::text("late", "")).unwrap_err();
    assert!(matches!(err, PeerError::UnknownTarget(target) if target == id));
}

#[test]
fn stop_disconnects_connected_clients() {
    let (server_tx, server_rx) = mpsc::channel();
    let server = Server::with_config(server_config(), server_tx);
    server.start().unwrap();
    let addr = server.local_addr().unwrap();

    let mut clients = Vec::new();
    for _ in 0..3 {
        let (tx, rx) = mpsc::channel();
        let client = Client::with_config(client_config(), tx);
        client.connect(addr).unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), ClientEvent::Connected);
        clients.push((client, rx));
    }
    wait_until("three registrations", || server.client_count() == 3);

    server.stop();

    assert_eq!(server.client_count(), 0);
    let disconnected = server_rx
        .try_iter()
        .filter(|event| matches!(event, ServerEvent::ClientDisconnected(_)))
        .count();
    assert_eq!(disconnected, 3);

    for (client, rx) in &clients {
        loop {
            match rx.recv_timeout(WAIT).unwrap() {
                ClientEvent::Disconnected => break,
                _ => continue,
            }
        }
        assert_eq!(client.state(), ClientState::Disconnected);
    }
}

#[test]
fn handler_can_stop_the_server() {
    struct StopOnMessage;

    impl ServerEvents for StopOnMessage {
        fn on_payloads_received(
            &self,
            server: &ServerHandle,
            _id: ConnectionId,
            _payloads: Vec<Payload>,
        ) {
            server.stop();
        }
    }

    let server = Server::with_config(server_config(), StopOnMessage);
    server.start().unwrap();
    let client = Client::with_config(client_config(), ());
    client.connect(server.local_addr().unwrap()).unwrap();

    client.send(&Payload::text("shutdown", "")).unwrap();

    wait_until("server to stop", || !server.is_listening());
    wait_until("client to be dropped", || !client.is_connected());
}

#[test]
fn connect_to_closed_port_fails() {
    let (server, addr) = echo_server();
    server.stop();

    let client = Client::with_config(client_config(), ());
    assert!(matches!(
        client.connect(addr).unwrap_err(),
        PeerError::Connection(_)
    ));
    assert_eq!(client.state(), ClientState::Disconnected);
}
