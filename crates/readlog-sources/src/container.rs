//! Container log producers backed by the Docker daemon.
//!
//! The daemon multiplexes stdout and stderr on one HTTP body, prefixing each
//! record with an 8-byte header (stream kind, three zero bytes, big-endian
//! payload length). `bollard` decodes that framing; both streams are
//! forwarded, so only the payloads reach the producers.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use bollard::container::{LogOutput, LogsOptions};
use bollard::Docker;
use futures::stream::BoxStream;
use futures::StreamExt;
use readlog_proto::{HistoryQuery, TimeBound, FOLLOW_BACKLOG_LINES};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{SourceError, SourceResult};
use crate::producer::{forward_all, forward_history, ProducerExit};
use crate::sink::RecordSink;

/// Seconds the Docker client waits on a request before giving up.
const DOCKER_TIMEOUT_SECS: u64 = 120;

/// Payload of one demultiplexed frame, whichever stream it came from.
fn frame_payload(output: LogOutput) -> Vec<u8> {
    match output {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::StdIn { message }
        | LogOutput::Console { message } => message.to_vec(),
    }
}

/// Frame payloads from one open container log.
pub type FrameStream = BoxStream<'static, SourceResult<Vec<u8>>>;

/// What to read from a container log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLogQuery {
    /// Keep the stream open for new records.
    pub follow: bool,
    /// Number of trailing records to replay; `None` replays everything.
    pub tail: Option<usize>,
    /// Lower time bound.
    pub since: Option<TimeBound>,
    /// Upper time bound.
    pub until: Option<TimeBound>,
}

impl ContainerLogQuery {
    /// Live tail with a short backlog.
    #[must_use]
    pub const fn follow() -> Self {
        Self {
            follow: true,
            tail: Some(FOLLOW_BACKLOG_LINES),
            since: None,
            until: None,
        }
    }

    /// Bounded read over the window of a historical request.
    #[must_use]
    pub fn history(query: &HistoryQuery) -> Self {
        Self {
            follow: false,
            tail: None,
            since: query.since.as_deref().and_then(TimeBound::parse),
            until: query.until.as_deref().and_then(TimeBound::parse),
        }
    }
}

/// Access to container logs.
pub trait ContainerLogSource: Send + Sync + 'static {
    /// Open the log of `container`.
    ///
    /// The returned stream owns its connection to the daemon; dropping it
    /// releases the connection.
    fn open(
        &self,
        container: &str,
        query: &ContainerLogQuery,
    ) -> impl Future<Output = SourceResult<FrameStream>> + Send;
}

/// How to reach the Docker daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DockerEndpoint {
    /// `DOCKER_HOST` or the platform's default socket.
    #[default]
    LocalDefaults,
    /// A Unix socket path.
    #[cfg(unix)]
    Unix(String),
    /// An HTTP URL such as `tcp://10.0.0.5:2375`.
    Http(String),
}

impl FromStr for DockerEndpoint {
    type Err = SourceError;

    /// Parse a `DOCKER_HOST`-style address: `unix:///path`, `tcp://host:port`
    /// or `http://host:port`. An empty string selects the local defaults.
    fn from_str(host: &str) -> Result<Self, Self::Err> {
        let host = host.trim();
        if host.is_empty() {
            return Ok(Self::LocalDefaults);
        }
        #[cfg(unix)]
        if let Some(path) = host.strip_prefix("unix://") {
            if !path.is_empty() {
                return Ok(Self::Unix(path.to_string()));
            }
        }
        if host.starts_with("tcp://") || host.starts_with("http://") {
            return Ok(Self::Http(host.to_string()));
        }
        Err(SourceError::DockerConnect(format!(
            "unsupported docker host {host:?}"
        )))
    }
}

/// Container logs read from the Docker daemon.
///
/// A fresh client is created for every open, so each producer owns its own
/// connection and nothing is shared between sessions.
#[derive(Debug, Clone, Default)]
pub struct DockerLogs {
    endpoint: DockerEndpoint,
}

impl DockerLogs {
    /// Use the given endpoint.
    #[must_use]
    pub const fn new(endpoint: DockerEndpoint) -> Self {
        Self { endpoint }
    }

    /// The configured endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &DockerEndpoint {
        &self.endpoint
    }

    /// Create a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be configured.
    pub fn connect(&self) -> SourceResult<Docker> {
        let client = match &self.endpoint {
            DockerEndpoint::LocalDefaults => Docker::connect_with_local_defaults(),
            #[cfg(unix)]
            DockerEndpoint::Unix(path) => {
                Docker::connect_with_unix(path, DOCKER_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            }
            DockerEndpoint::Http(url) => {
                Docker::connect_with_http(url, DOCKER_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            }
        };
        client.map_err(|e| SourceError::DockerConnect(e.to_string()))
    }
}

impl ContainerLogSource for DockerLogs {
    async fn open(&self, container: &str, query: &ContainerLogQuery) -> SourceResult<FrameStream> {
        let docker = self.connect()?;

        let options = LogsOptions::<String> {
            follow: query.follow,
            stdout: true,
            stderr: true,
            since: query.since.as_ref().and_then(bound_seconds).unwrap_or(0),
            until: query.until.as_ref().and_then(bound_seconds).unwrap_or(0),
            timestamps: false,
            tail: query
                .tail
                .map_or_else(|| "all".to_string(), |n| n.to_string()),
        };

        debug!(container = %container, follow = query.follow, "Opening container log");
        let stream = docker.logs(container, Some(options));

        // The stream keeps the client alive so both are released together.
        Ok(stream
            .map(move |item| {
                let _client = &docker;
                item.map(frame_payload).map_err(SourceError::from)
            })
            .boxed())
    }
}

fn bound_seconds(bound: &TimeBound) -> Option<i64> {
    let seconds = bound.unix_seconds();
    if seconds.is_none() {
        warn!(bound = %bound.to_utc_string(), "Ignoring time bound the Docker API cannot express");
    }
    seconds
}

/// Drop empty frames.
fn payloads(frames: FrameStream) -> FrameStream {
    frames
        .filter(|item| {
            let keep = !matches!(item, Ok(payload) if payload.is_empty());
            async move { keep }
        })
        .boxed()
}

/// Open `container`, racing the open against cancellation.
async fn open_or_cancel<C: ContainerLogSource>(
    source: &C,
    container: &str,
    query: &ContainerLogQuery,
    cancel: &CancellationToken,
) -> Result<FrameStream, ProducerExit> {
    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(ProducerExit::Cancelled),
        opened = source.open(container, query) => opened,
    };
    opened.map_err(|e| {
        warn!(container = %container, error = %e, "Failed to open container log");
        ProducerExit::UpstreamFailed
    })
}

/// Live-tail a container until cancelled, the stream ends, or a write fails.
pub async fn follow_container<C, S>(
    source: Arc<C>,
    container: String,
    sink: S,
    cancel: CancellationToken,
) -> ProducerExit
where
    C: ContainerLogSource,
    S: RecordSink,
{
    let query = ContainerLogQuery::follow();
    match open_or_cancel(source.as_ref(), &container, &query, &cancel).await {
        Ok(frames) => forward_all(payloads(frames), &sink, &cancel).await,
        Err(exit) => exit,
    }
}

/// Read a bounded, filtered window of a container log, ending with the sentinel.
pub async fn container_history<C, S>(
    source: Arc<C>,
    container: String,
    query: HistoryQuery,
    sink: S,
    cancel: CancellationToken,
) -> ProducerExit
where
    C: ContainerLogSource,
    S: RecordSink,
{
    let log_query = ContainerLogQuery::history(&query);
    let frames = match open_or_cancel(source.as_ref(), &container, &log_query, &cancel).await {
        Ok(frames) => frames,
        // An empty upstream still yields the sentinel.
        Err(exit) => {
            let empty: FrameStream = futures::stream::empty().boxed();
            forward_history(payloads(empty), &query, &sink, &cancel).await;
            return exit;
        }
    };
    forward_history(payloads(frames), &query, &sink, &cancel).await
}
