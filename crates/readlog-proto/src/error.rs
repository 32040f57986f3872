//! Error types for the readlog-proto crate.

use thiserror::Error;

/// Errors that can occur while decoding a control message.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The payload was not a valid control message.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// `log_type` named neither `realtime` nor `history`.
    #[error("unknown log mode: {0:?}")]
    UnknownMode(String),

    /// `service_type` named neither `docker` nor `systemd`.
    #[error("unknown source kind: {0:?}")]
    UnknownKind(String),

    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A field carried a value that cannot be forwarded to a log source.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ProtoError {
    /// Create an invalid field error.
    #[must_use]
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ProtoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decoding(err.to_string())
    }
}
