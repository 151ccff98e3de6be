use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use smokelight_frame::Payload;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct PayloadOutput<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    payload_type: &'static str,
    size: usize,
    data: String,
    peer: &'a str,
    index: usize,
    timestamp: String,
}

/// Print one received pack. `peer` is the client id on servers and the
/// server address on clients.
pub fn print_payloads(payloads: &[Payload], peer: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let timestamp = now_unix_seconds();
            for (index, payload) in payloads.iter().enumerate() {
                let out = PayloadOutput {
                    name: payload.name(),
                    payload_type: payload.payload_type().as_str(),
                    size: payload.data().len(),
                    data: data_preview(payload),
                    peer,
                    index,
                    timestamp: timestamp.clone(),
                };
                println!(
                    "{}",
                    serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["NAME", "TYPE", "SIZE", "PEER", "DATA"]);
            for payload in payloads {
                table.add_row(vec![
                    payload.name().to_string(),
                    payload.payload_type().as_str().to_string(),
                    payload.data().len().to_string(),
                    peer.to_string(),
                    data_preview(payload),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for payload in payloads {
                println!(
                    "name={} type={} size={} peer={} data={}",
                    payload.name(),
                    payload.payload_type().as_str(),
                    payload.data().len(),
                    peer,
                    data_preview(payload)
                );
            }
        }
        OutputFormat::Raw => {
            for payload in payloads {
                print_raw(payload.data());
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn data_preview(payload: &Payload) -> String {
    match payload.text_data() {
        Some(text) => text.to_string(),
        None => format!("<binary {} bytes>", payload.data().len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
