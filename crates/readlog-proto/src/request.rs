//! Control messages and the requests decoded from them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProtoError;

/// Records returned by a historical read when the client asks for `0` lines.
pub const DEFAULT_HISTORY_LINES: usize = 1000;

/// Upper bound on records returned by a single historical read.
pub const MAX_HISTORY_LINES: usize = 10_000;

/// Backlog replayed before a live tail starts following.
pub const FOLLOW_BACKLOG_LINES: usize = 50;

/// Characters that would let a value break out of its argv slot or HTTP query.
const FORBIDDEN_CHARS: &[char] = &['\0', '\n', '\r'];

/// Whether a log is followed live or read over a bounded window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogMode {
    /// Replay a short backlog, then stream new records until stopped.
    #[serde(rename = "realtime")]
    Follow,
    /// Read a bounded, filtered window and finish with the sentinel.
    #[serde(rename = "history")]
    History,
}

impl LogMode {
    /// Wire name of the mode.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Follow => "realtime",
            Self::History => "history",
        }
    }

    fn from_wire(value: &str) -> Result<Self, ProtoError> {
        match value {
            "realtime" => Ok(Self::Follow),
            "history" => Ok(Self::History),
            other => Err(ProtoError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for LogMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of log source a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// A container managed by the Docker daemon.
    #[serde(rename = "docker")]
    Container,
    /// A systemd unit read through the journal.
    #[serde(rename = "systemd")]
    Service,
}

impl SourceKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Container => "docker",
            Self::Service => "systemd",
        }
    }

    fn from_wire(value: &str) -> Result<Self, ProtoError> {
        match value {
            "docker" => Ok(Self::Container),
            "systemd" => Ok(Self::Service),
            other => Err(ProtoError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control message exactly as the browser sends it.
///
/// Every field is optional on the wire; missing strings decode as empty and a
/// missing `lines` as `0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlMessage {
    /// `realtime` or `history`.
    pub log_type: String,
    /// `docker` or `systemd`.
    pub service_type: String,
    /// Container name or unit name.
    pub service_name: String,
    /// Lower time bound for historical reads.
    pub since: String,
    /// Upper time bound for historical reads.
    pub until: String,
    /// Substring a record must contain to be forwarded.
    pub grep: String,
    /// Requested record count for historical reads.
    pub lines: i64,
}

impl ControlMessage {
    /// Deserialize from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a JSON control message.
    pub fn from_slice(raw: &[u8]) -> Result<Self, ProtoError> {
        serde_json::from_slice(raw).map_err(|e| ProtoError::Decoding(e.to_string()))
    }
}

/// Parameters of a bounded historical read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Lower bound as sent by the client, if any.
    pub since: Option<String>,
    /// Upper bound as sent by the client, if any.
    pub until: Option<String>,
    /// Substring filter; empty matches every record.
    pub filter: String,
    /// Number of matching records to forward, already clamped.
    pub limit: usize,
}

impl HistoryQuery {
    /// Create a query with no bounds, no filter and the default limit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            since: None,
            until: None,
            filter: String::new(),
            limit: DEFAULT_HISTORY_LINES,
        }
    }

    /// Set the lower bound.
    #[must_use]
    pub fn with_since(mut self, since: impl Into<String>) -> Self {
        self.since = non_empty(since.into());
        self
    }

    /// Set the upper bound.
    #[must_use]
    pub fn with_until(mut self, until: impl Into<String>) -> Self {
        self.until = non_empty(until.into());
        self
    }

    /// Set the substring filter.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Set the record limit, applying the default and the hard cap.
    #[must_use]
    pub fn with_limit(mut self, lines: i64) -> Self {
        self.limit = effective_limit(lines);
        self
    }

    /// Whether a record passes the substring filter.
    #[must_use]
    pub fn matches(&self, record: &[u8]) -> bool {
        let needle = self.filter.as_bytes();
        needle.is_empty() || record.windows(needle.len()).any(|w| w == needle)
    }
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self::new()
    }
}

/// Follow or history, with the history parameters attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMode {
    /// Live tail.
    Follow,
    /// Bounded read.
    History(HistoryQuery),
}

/// A validated request to watch one log source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRequest {
    /// Kind of source.
    pub kind: SourceKind,
    /// Container or unit name.
    pub source: String,
    /// Follow or bounded history.
    pub mode: RequestMode,
}

impl LogRequest {
    /// Create a live-tail request.
    #[must_use]
    pub fn follow(kind: SourceKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            mode: RequestMode::Follow,
        }
    }

    /// Create a historical request.
    #[must_use]
    pub fn history(kind: SourceKind, source: impl Into<String>, query: HistoryQuery) -> Self {
        Self {
            kind,
            source: source.into(),
            mode: RequestMode::History(query),
        }
    }

    /// Decode and validate a raw control message.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not JSON, names an unknown mode or
    /// kind, lacks a source name, or carries control characters in a field
    /// that is forwarded to a log source.
    pub fn parse(raw: &[u8]) -> Result<Self, ProtoError> {
        Self::try_from(ControlMessage::from_slice(raw)?)
    }

    /// Wire mode of this request.
    #[must_use]
    pub const fn log_mode(&self) -> LogMode {
        match self.mode {
            RequestMode::Follow => LogMode::Follow,
            RequestMode::History(_) => LogMode::History,
        }
    }

    /// History parameters, if this is a bounded read.
    #[must_use]
    pub const fn history_query(&self) -> Option<&HistoryQuery> {
        match &self.mode {
            RequestMode::Follow => None,
            RequestMode::History(query) => Some(query),
        }
    }
}

impl TryFrom<ControlMessage> for LogRequest {
    type Error = ProtoError;

    fn try_from(msg: ControlMessage) -> Result<Self, Self::Error> {
        let mode = LogMode::from_wire(msg.log_type.trim())?;
        let kind = SourceKind::from_wire(msg.service_type.trim())?;

        let source = msg.service_name.trim().to_string();
        if source.is_empty() {
            return Err(ProtoError::MissingField("service_name"));
        }
        validate_field("service_name", &source)?;

        let mode = match mode {
            LogMode::Follow => RequestMode::Follow,
            LogMode::History => {
                validate_field("since", &msg.since)?;
                validate_field("until", &msg.until)?;
                validate_field("grep", &msg.grep)?;
                RequestMode::History(
                    HistoryQuery::new()
                        .with_since(msg.since.trim())
                        .with_until(msg.until.trim())
                        .with_filter(msg.grep)
                        .with_limit(msg.lines),
                )
            }
        };

        Ok(Self { kind, source, mode })
    }
}

/// Apply the default and the hard cap to a requested record count.
///
/// Zero and negative counts mean "unspecified".
#[must_use]
pub fn effective_limit(lines: i64) -> usize {
    if lines <= 0 {
        return DEFAULT_HISTORY_LINES;
    }
    usize::try_from(lines).map_or(MAX_HISTORY_LINES, |n| n.min(MAX_HISTORY_LINES))
}

/// Whether a payload is one of the browser's idle keepalives (`0` or `"0"`).
#[must_use]
pub fn is_keepalive(raw: &[u8]) -> bool {
    matches!(raw.trim_ascii(), b"0" | b"\"0\"")
}

fn validate_field(field: &'static str, value: &str) -> Result<(), ProtoError> {
    if let Some(c) = value.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(ProtoError::invalid_field(
            field,
            format!("contains control character {c:?}"),
        ));
    }
    Ok(())
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
