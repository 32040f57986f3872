//! Producer handles and the forwarding loops shared by every source.
//!
//! A producer is one tokio task that owns exactly one upstream resource (a
//! Docker log stream or a journal reader process) and pushes its records to
//! a [`RecordSink`]. The [`ProducerHandle`] returned to the session carries
//! the two signals the stop-then-replace protocol relies on:
//!
//! - a [`CancellationToken`], safe to raise any number of times, before or
//!   after the task finished on its own;
//! - the task's join handle, which resolves only after the task has dropped
//!   its upstream resource.
//!
//! Every await on the upstream is raced against the token, so a stop never
//! waits on a read that has no data coming.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::{Stream, StreamExt};
use readlog_proto::{HistoryQuery, SENTINEL};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{SourceError, SourceResult};
use crate::sink::RecordSink;

/// How long a stopped history producer keeps trying to deliver the sentinel.
pub const SENTINEL_GRACE: Duration = Duration::from_millis(500);

/// Why a producer finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerExit {
    /// The cancellation token was raised.
    Cancelled,
    /// The upstream ended on its own.
    Ended,
    /// A historical read forwarded its full quota.
    Exhausted,
    /// The upstream could not be opened or failed mid-stream.
    UpstreamFailed,
    /// A write to the client failed.
    TransportClosed,
}

impl fmt::Display for ProducerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cancelled => "cancelled",
            Self::Ended => "ended",
            Self::Exhausted => "exhausted",
            Self::UpstreamFailed => "upstream failed",
            Self::TransportClosed => "transport closed",
        };
        f.write_str(s)
    }
}

/// Handle to one running producer task.
#[derive(Debug)]
pub struct ProducerHandle {
    label: String,
    cancel: CancellationToken,
    done: JoinHandle<ProducerExit>,
}

impl ProducerHandle {
    /// Spawn a producer task.
    ///
    /// `run` receives the producer's cancellation token and must release
    /// every upstream resource before its future completes.
    pub fn spawn<F, Fut>(label: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ProducerExit> + Send + 'static,
    {
        let label = label.into();
        let cancel = CancellationToken::new();
        let task = run(cancel.clone());
        let task_label = label.clone();
        let done = tokio::spawn(async move {
            let exit = task.await;
            debug!(producer = %task_label, exit = %exit, "Producer finished");
            exit
        });

        Self {
            label,
            cancel,
            done,
        }
    }

    /// Human-readable `kind:mode:source` label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Raise the cancellation token. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation has been raised.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the task has finished and released its upstream.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.done.is_finished()
    }

    /// Wait for the task to finish without cancelling it.
    ///
    /// # Errors
    ///
    /// Returns an error if the task panicked. Its upstream resource was still
    /// dropped during unwinding.
    pub async fn wait(self) -> SourceResult<ProducerExit> {
        self.done
            .await
            .map_err(|e| SourceError::Join(e.to_string()))
    }

    /// Cancel the task and wait until it has released its upstream.
    ///
    /// # Errors
    ///
    /// Returns an error if the task panicked.
    pub async fn stop(self) -> SourceResult<ProducerExit> {
        self.cancel();
        self.wait().await
    }
}

/// Forward every record until the upstream ends or the token is raised.
pub(crate) async fn forward_all<St, S>(
    records: St,
    sink: &S,
    cancel: &CancellationToken,
) -> ProducerExit
where
    St: Stream<Item = SourceResult<Vec<u8>>> + Unpin,
    S: RecordSink,
{
    let mut records = records;
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return ProducerExit::Cancelled,
            next = records.next() => next,
        };

        match next {
            None => return ProducerExit::Ended,
            Some(Err(e)) => {
                warn!(error = %e, "Log upstream failed");
                return ProducerExit::UpstreamFailed;
            }
            Some(Ok(record)) => {
                let sent = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return ProducerExit::Cancelled,
                    sent = sink.send(record) => sent,
                };
                if let Err(e) = sent {
                    debug!(error = %e, "Stopping producer after failed write");
                    return ProducerExit::TransportClosed;
                }
            }
        }
    }
}

/// Forward up to `query.limit` matching records, then the sentinel.
///
/// The sentinel follows every outcome except a failed write. Once the token
/// is raised, a write that does not complete within [`SENTINEL_GRACE`] is
/// abandoned.
pub(crate) async fn forward_history<St, S>(
    records: St,
    query: &HistoryQuery,
    sink: &S,
    cancel: &CancellationToken,
) -> ProducerExit
where
    St: Stream<Item = SourceResult<Vec<u8>>> + Unpin,
    S: RecordSink,
{
    let mut records = records;
    let mut remaining = query.limit;

    let exit = loop {
        if remaining == 0 {
            break ProducerExit::Exhausted;
        }

        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break ProducerExit::Cancelled,
            next = records.next() => next,
        };

        match next {
            None => break ProducerExit::Ended,
            Some(Err(e)) => {
                warn!(error = %e, "Log upstream failed");
                break ProducerExit::UpstreamFailed;
            }
            Some(Ok(record)) => {
                if !query.matches(&record) {
                    continue;
                }
                remaining -= 1;
                let sent = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break ProducerExit::Cancelled,
                    sent = sink.send(record) => sent,
                };
                if let Err(e) = sent {
                    debug!(error = %e, "Stopping producer after failed write");
                    return ProducerExit::TransportClosed;
                }
            }
        }
    };

    send_sentinel(sink, cancel).await;
    exit
}

async fn send_sentinel<S: RecordSink>(sink: &S, cancel: &CancellationToken) {
    let grace = async {
        cancel.cancelled().await;
        tokio::time::sleep(SENTINEL_GRACE).await;
    };

    tokio::select! {
        biased;
        sent = sink.send(SENTINEL.as_bytes().to_vec()) => {
            if let Err(e) = sent {
                debug!(error = %e, "Could not deliver end-of-history marker");
            }
        }
        () = grace => debug!("Abandoning end-of-history marker on a stalled client"),
    }
}
