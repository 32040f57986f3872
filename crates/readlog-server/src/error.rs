//! Error types for the log server.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the log server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    /// WebSocket error occurred.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Failed to encode output.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The previous producer did not stop in time.
    #[error("producer {label} did not stop within {timeout:?}")]
    StopTimeout {
        /// Label of the producer being replaced.
        label: String,
        /// Configured bound.
        timeout: Duration,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ServerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
