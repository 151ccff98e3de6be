use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use smokelight_peer::{ConnectionConfig, ServerConfig};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod echo;
pub mod listen;
pub mod relay;
pub mod send;
pub mod version;

/// Port used when none is given.
pub const DEFAULT_PORT: u16 = 12345;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start an echo server: every pack goes back to its sender.
    Echo(EchoArgs),
    /// Start a relay server: every pack is broadcast to all clients.
    Relay(RelayArgs),
    /// Start a server and print received payloads.
    Listen(ListenArgs),
    /// Connect, send one payload, optionally wait for a reply.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args),
        Command::Relay(args) => relay::run(args),
        Command::Listen(args) => listen::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Listener options shared by the server commands.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// TCP port to listen on (0 picks a free port).
    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT, env = "SMOKELIGHT_PORT")]
    pub port: u16,
    /// Address to bind.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED), env = "SMOKELIGHT_BIND")]
    pub bind: IpAddr,
    /// Largest accepted pack in bytes.
    #[arg(long, value_name = "BYTES", env = "SMOKELIGHT_MAX_FRAME_SIZE")]
    pub max_frame_size: Option<usize>,
}

impl ServeArgs {
    pub fn server_config(&self) -> ServerConfig {
        let defaults = ConnectionConfig::default();
        ServerConfig {
            connection: ConnectionConfig {
                max_frame_size: self.max_frame_size.unwrap_or(defaults.max_frame_size),
                ..defaults
            },
            ..ServerConfig::with_bind_address(self.bind, self.port)
        }
    }
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Args, Debug)]
pub struct RelayArgs {
    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub serve: ServeArgs,
    /// Only print payloads with this name.
    #[arg(long)]
    pub name: Option<String>,
    /// Exit after receiving N packs.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Server address (host:port).
    pub addr: String,
    /// Payload name.
    #[arg(long, short = 'n', default_value = "message")]
    pub name: String,
    /// Send a text payload.
    #[arg(long, conflicts_with_all = ["binary", "file"])]
    pub text: Option<String>,
    /// Send the UTF-8 bytes of this string as a binary payload.
    #[arg(long, conflicts_with_all = ["text", "file"])]
    pub binary: Option<String>,
    /// Send a file's contents as a binary payload.
    #[arg(long, conflicts_with_all = ["text", "binary"])]
    pub file: Option<PathBuf>,
    /// Wait for one reply pack and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
    /// Connect timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Block until Ctrl-C.
pub fn wait_for_interrupt(running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }
}

/// Parse `500ms`, `5s`, `2m` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    let digits_end = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(digits_end);

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {input:?}")))?;

    let duration = match unit {
        "ms" => Duration::from_millis(value),
        "" | "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        other => {
            return Err(CliError::new(
                USAGE,
                format!("unknown duration unit {other:?} (use ms, s or m)"),
            ))
        }
    };

    if duration.is_zero() {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }
    Ok(duration)
}
