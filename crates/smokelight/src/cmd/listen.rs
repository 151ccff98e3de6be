use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use smokelight_frame::Payload;
use smokelight_peer::{Server, ServerEvent};

use crate::cmd::{install_ctrlc_handler, ListenArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_payloads, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let (tx, rx) = mpsc::channel();
    let server = Server::with_config(args.serve.server_config(), tx);
    server
        .start()
        .map_err(|err| peer_error("start failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        let event = match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => event,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        let ServerEvent::PayloadsReceived(id, payloads) = event else {
            continue;
        };
        let payloads = filter_by_name(payloads, args.name.as_deref());
        if payloads.is_empty() {
            continue;
        }

        print_payloads(&payloads, &id.to_string(), format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    server.stop();
    Ok(SUCCESS)
}

fn filter_by_name(payloads: Vec<Payload>, name: Option<&str>) -> Vec<Payload> {
    match name {
        Some(name) => payloads.into_iter().filter(|p| p.name() == name).collect(),
        None => payloads,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_filter_keeps_order() {
        let payloads = vec![
            Payload::text("a", "1"),
            Payload::text("b", "2"),
            Payload::text("a", "3"),
        ];
        let kept = filter_by_name(payloads.clone(), Some("a"));
        assert_eq!(kept, vec![Payload::text("a", "1"), Payload::text("a", "3")]);
        assert_eq!(filter_by_name(payloads.clone(), None), payloads);
    }
}
