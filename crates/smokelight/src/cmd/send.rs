use std::fs;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use smokelight_frame::Payload;
use smokelight_peer::{Client, ClientConfig, ClientEvent};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{io_error, peer_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT};
use crate::output::{print_payloads, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let connect_timeout = parse_duration(&args.connect_timeout)?;
    let payload = resolve_payload(&args)?;

    let (tx, rx) = mpsc::channel();
    let client = Client::with_config(
        ClientConfig {
            connect_timeout: Some(connect_timeout),
            ..ClientConfig::default()
        },
        tx,
    );
    client
        .connect(args.addr.as_str())
        .map_err(|err| peer_error("connect failed", err))?;

    client
        .send(&payload)
        .map_err(|err| peer_error("send failed", err))?;
    tracing::debug!(name = payload.name(), size = payload.data().len(), "payload sent");

    if args.wait {
        let reply = wait_for_reply(&rx, wait_timeout)?;
        let peer = client
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| args.addr.clone());
        print_payloads(&reply, &peer, format);
    }

    client.disconnect();
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Payload> {
    if let Some(text) = &args.text {
        return Ok(Payload::text(args.name.as_str(), text.as_str()));
    }
    if let Some(data) = &args.binary {
        return Ok(Payload::binary(args.name.as_str(), data.as_bytes().to_vec()));
    }
    if let Some(path) = &args.file {
        let data = fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        return Ok(Payload::binary(args.name.as_str(), data));
    }
    Ok(Payload::text(args.name.as_str(), ""))
}

/// Wait for the first received pack, skipping lifecycle events.
fn wait_for_reply(rx: &mpsc::Receiver<ClientEvent>, timeout: Duration) -> CliResult<Vec<Payload>> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(ClientEvent::PayloadsReceived(payloads)) => return Ok(payloads),
            Ok(ClientEvent::Connected) => continue,
            Ok(ClientEvent::Disconnected) | Err(RecvTimeoutError::Disconnected) => {
                return Err(CliError::new(
                    FAILURE,
                    "server closed the connection before replying",
                ))
            }
            Err(RecvTimeoutError::Timeout) => {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no reply within {}ms", timeout.as_millis()),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn send_args() -> SendArgs {
        SendArgs {
            addr: "127.0.0.1:12345".to_string(),
            name: "echo".to_string(),
            text: None,
            binary: None,
            file: None,
            wait: false,
            wait_timeout: "5s".to_string(),
            connect_timeout: "5s".to_string(),
        }
    }

    #[test]
    fn text_and_binary_payloads() {
        let mut args = send_args();
        args.text = Some("hello world".to_string());
        assert_eq!(
            resolve_payload(&args).unwrap(),
            Payload::text("echo", "hello world")
        );

        let mut args = send_args();
        args.binary = Some("abc".to_string());
        assert_eq!(
            resolve_payload(&args).unwrap(),
            Payload::binary("echo", b"abc".to_vec())
        );
    }

    #[test]
    fn missing_file_maps_to_io_error() {
        let mut args = send_args();
        args.file = Some(PathBuf::from("/nonexistent/smokelight/payload.bin"));
        let err = resolve_payload(&args).unwrap_err();
        assert!(err.message.starts_with("failed reading"));
    }

    #[test]
    fn wait_skips_connected_event() {
        let (tx, rx) = mpsc::channel();
        tx.send(ClientEvent::Connected).unwrap();
        tx.send(ClientEvent::PayloadsReceived(vec![Payload::text("r", "ok")]))
            .unwrap();

        let reply = wait_for_reply(&rx, Duration::from_secs(1)).unwrap();
        assert_eq!(reply, vec![Payload::text("r", "ok")]);
    }

    #[test]
    fn wait_times_out() {
        let (_tx, rx) = mpsc::channel::<ClientEvent>();
        let err = wait_for_reply(&rx, Duration::from_millis(20)).unwrap_err();
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn wait_reports_disconnect() {
        let (tx, rx) = mpsc::channel();
        tx.send(ClientEvent::Disconnected).unwrap();
        let err = wait_for_reply(&rx, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.code, FAILURE);
    }
}
