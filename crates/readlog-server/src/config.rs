//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default listen address: all interfaces, port 9198.
pub const DEFAULT_BIND_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9198);

/// Default WebSocket endpoint path.
pub const DEFAULT_WS_PATH: &str = "/readlog/wsapi";

/// Default maximum number of concurrent sessions.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Default bound on waiting for a replaced producer to finish.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default maximum control message size: 64KB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Configuration for the log server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind the WebSocket server to.
    pub bind_addr: SocketAddr,
    /// Request path the WebSocket endpoint is served on.
    pub ws_path: String,
    /// Maximum number of concurrent sessions.
    pub max_connections: usize,
    /// How long a session waits for its previous producer to stop.
    /// Expiry closes the session.
    pub stop_timeout: Duration,
    /// Control messages larger than this are discarded.
    pub max_message_size: usize,
}

impl ServerConfig {
    /// Create a new server configuration with the specified bind address.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ws_path: DEFAULT_WS_PATH.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Set the WebSocket path. A missing leading `/` is added.
    #[must_use]
    pub fn with_ws_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.ws_path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the producer stop timeout.
    #[must_use]
    pub const fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Set the maximum control message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Check if a control message size is within the allowed limit.
    #[must_use]
    pub const fn is_message_size_valid(&self, size: usize) -> bool {
        size <= self.max_message_size
    }

    /// Whether `path` is the configured WebSocket endpoint.
    #[must_use]
    pub fn is_ws_path(&self, path: &str) -> bool {
        path == self.ws_path
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BIND_ADDR)
    }
}
