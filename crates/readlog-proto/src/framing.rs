//! Reply framing.

use std::fmt;

/// Record sent after the last line of a historical read.
pub const SENTINEL: &str = "-------->message send over<--------";

/// WebSocket frame type used for every reply on a session.
///
/// Fixed by the first accepted control message and reused for the lifetime
/// of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyFraming {
    /// UTF-8 text frames. Non-UTF-8 bytes are replaced lossily.
    Text,
    /// Binary frames carrying the raw record bytes.
    Binary,
}

impl fmt::Display for ReplyFraming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Binary => write!(f, "binary"),
        }
    }
}
