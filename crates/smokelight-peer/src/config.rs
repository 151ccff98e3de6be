use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use smokelight_frame::{FrameConfig, DEFAULT_MAX_FRAME_SIZE};

/// Per-connection behavior shared by clients and servers.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest pack accepted or sent, header and trailer included.
    pub max_frame_size: usize,
    /// Read timeout of the receive loop. Bounds how long a loop takes to
    /// notice a disconnect request.
    pub poll_interval: Duration,
    /// Timeout for writing one pack. `None` blocks until the peer drains.
    pub write_timeout: Option<Duration>,
    /// Disable Nagle's algorithm on the socket.
    pub nodelay: bool,
}

impl ConnectionConfig {
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_frame_size: self.max_frame_size,
            read_timeout: Some(self.poll_interval),
            write_timeout: self.write_timeout,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            poll_interval: Duration::from_millis(100),
            write_timeout: Some(Duration::from_secs(5)),
            nodelay: true,
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    /// Give up connecting after this long. `None` uses the OS default.
    pub connect_timeout: Option<Duration>,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on. Port `0` picks an ephemeral port.
    pub bind_address: SocketAddr,
    pub connection: ConnectionConfig,
    /// Sleep between accept attempts when nothing is pending or accept failed.
    pub accept_poll_interval: Duration,
}

impl ServerConfig {
    /// Listen on all IPv4 interfaces at `port`.
    pub fn new(port: u16) -> Self {
        Self::with_bind_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
    }

    pub fn with_bind_address(address: IpAddr, port: u16) -> Self {
        Self {
            bind_address: SocketAddr::new(address, port),
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            connection: ConnectionConfig::default(),
            accept_poll_interval: Duration::from_millis(50),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_config_uses_poll_interval_as_read_timeout() {
        let config = ConnectionConfig {
            poll_interval: Duration::from_millis(25),
            ..ConnectionConfig::default()
        };
        let frame = config.frame_config();
        assert_eq!(frame.read_timeout, Some(Duration::from_millis(25)));
        assert_eq!(frame.write_timeout, Some(Duration::from_secs(5)));
        assert_eq!(frame.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn server_config_binds_all_interfaces_by_default() {
        let config = ServerConfig::new(12345);
        assert_eq!(config.bind_address, "0.0.0.0:12345".parse().unwrap());
    }
}
