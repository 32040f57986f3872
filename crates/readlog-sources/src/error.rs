//! Error types for log sources and sinks.

use thiserror::Error;

/// Errors raised while opening or reading a log source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The Docker client could not be created.
    #[error("failed to connect to Docker: {0}")]
    DockerConnect(String),

    /// The Docker daemon returned an error.
    #[error("docker error: {0}")]
    Docker(String),

    /// A log reader process could not be started.
    #[error("failed to spawn {program}: {reason}")]
    Spawn {
        /// Program that was being started.
        program: String,
        /// Underlying failure.
        reason: String,
    },

    /// A helper process exited unsuccessfully.
    #[error("{program} exited with {status}")]
    Exited {
        /// Program that was run.
        program: String,
        /// Exit status as reported by the OS.
        status: String,
    },

    /// A spawned process exposed no stdout pipe.
    #[error("{0} has no stdout pipe")]
    MissingStdout(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A producer task panicked or was aborted.
    #[error("producer task failed: {0}")]
    Join(String),
}

impl SourceError {
    /// Create a spawn error.
    #[must_use]
    pub fn spawn(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Spawn {
            program: program.into(),
            reason: reason.into(),
        }
    }
}

impl From<bollard::errors::Error> for SourceError {
    fn from(err: bollard::errors::Error) -> Self {
        Self::Docker(err.to_string())
    }
}

/// Errors raised when writing a record to the client.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The connection is gone.
    #[error("transport closed")]
    Closed,

    /// The write failed.
    #[error("transport write failed: {0}")]
    Write(String),
}

/// Result type alias for source operations.
pub type SourceResult<T> = Result<T, SourceError>;
