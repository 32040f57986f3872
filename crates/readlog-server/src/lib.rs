//! # readlog-server
//!
//! WebSocket server that streams Docker container and systemd service logs
//! to a browser.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   WebSocket   ┌─────────────────────────────┐
//! │ browser  │◄─────────────►│ LogServer                   │
//! └──────────┘               │  ┌───────────────────────┐  │    ┌────────────┐
//!                            │  │ SessionController     │──┼───►│ Docker API │
//!                            │  │  (0..1 producer)      │  │    └────────────┘
//! ┌──────────┐               │  └───────────────────────┘  │    ┌────────────┐
//! │ browser  │◄─────────────►│  ┌───────────────────────┐  │───►│ journalctl │
//! └──────────┘               │  │ SessionController     │  │    └────────────┘
//!                            │  └───────────────────────┘  │
//!                            └─────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use readlog_server::{LogServer, ServerConfig};
//! use readlog_sources::LogSources;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default().with_max_connections(100);
//!     let server = LogServer::new(config, LogSources::system());
//!     server.serve().await.unwrap();
//! }
//! ```
//!
//! ## Message Protocol
//!
//! Each text or binary frame from the browser is a JSON control message
//! (see `readlog-proto`). A new message replaces whatever the session was
//! streaming. The bare keepalive `"0"` is ignored. Replies are raw log
//! records; a historical read ends with the sentinel record.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod server;
pub mod session;
pub mod transport;

// Re-export main types
pub use config::{
    ServerConfig, DEFAULT_BIND_ADDR, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_MESSAGE_SIZE,
    DEFAULT_STOP_TIMEOUT, DEFAULT_WS_PATH,
};
pub use error::{ServerError, ServerResult};
pub use server::{LogServer, SessionInfo};
pub use session::{RequestOutcome, SessionController};
pub use transport::{record_to_ws, Transport, WsRecordSink, WsTransport};
