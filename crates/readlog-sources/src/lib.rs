//! Log producers for the readlog viewer.
//!
//! This crate turns a [`LogRequest`](readlog_proto::LogRequest) into a
//! running producer:
//!
//! - container logs from the Docker daemon, followed or read over a window
//! - service logs from the systemd journal, followed or read over a window
//!
//! Each producer owns exactly one upstream resource and releases it before
//! its [`ProducerHandle`] reports completion.
//!
//! # Example
//!
//! ```rust,ignore
//! use readlog_sources::LogSources;
//! use readlog_proto::{LogRequest, SourceKind};
//!
//! let sources = LogSources::system();
//! let handle = sources.spawn(LogRequest::follow(SourceKind::Container, "web"), sink);
//! // ...
//! handle.stop().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod container;
pub mod dispatch;
pub mod error;
pub mod producer;
pub mod service;
pub mod sink;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use catalog::{parse_unit_listing, CatalogProvider};
pub use container::{
    container_history, follow_container, ContainerLogQuery, ContainerLogSource, DockerEndpoint,
    DockerLogs, FrameStream,
};
pub use dispatch::LogSources;
pub use error::{SinkError, SourceError, SourceResult};
pub use producer::{ProducerExit, ProducerHandle, SENTINEL_GRACE};
pub use service::{
    follow_service, service_history, Journalctl, ServiceCommand, LINE_QUEUE_CAPACITY,
};
pub use sink::RecordSink;
