//! # readlog-proto
//!
//! Wire definitions shared by the readlog server and its log sources.
//!
//! A browser opens one WebSocket and sends a sequence of control messages,
//! each asking to watch a container or a systemd unit either live
//! (`realtime`) or over a historical window (`history`):
//!
//! ```json
//! {"log_type":"history","service_type":"docker","service_name":"web",
//!  "since":"2024-05-01 08:00:00","until":"","grep":"ERROR","lines":200}
//! ```
//!
//! The server answers with raw log records. A historical read ends with
//! [`SENTINEL`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod error;
pub mod framing;
pub mod request;
pub mod time;

pub use catalog::{strip_unit_suffix, Catalog, CatalogEntry, SourceGroup, SourceStatus};
pub use error::ProtoError;
pub use framing::{ReplyFraming, SENTINEL};
pub use request::{
    effective_limit, is_keepalive, ControlMessage, HistoryQuery, LogMode, LogRequest,
    RequestMode, SourceKind, DEFAULT_HISTORY_LINES, FOLLOW_BACKLOG_LINES, MAX_HISTORY_LINES,
};
pub use time::TimeBound;
