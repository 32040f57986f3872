//! In-memory sinks and scripted sources for tests.
//!
//! Enabled for this crate's own tests and, through the `test-helpers`
//! feature, for downstream crates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use readlog_proto::RequestMode;
use tokio::process::Command;
use tokio::sync::Notify;

use crate::container::{ContainerLogQuery, ContainerLogSource, FrameStream};
use crate::error::{SinkError, SourceError, SourceResult};
use crate::service::ServiceCommand;
use crate::sink::RecordSink;

// ==================== RecordingSink ====================

#[derive(Debug, Default)]
struct Recorded {
    records: Mutex<Vec<Vec<u8>>>,
    fail_after: Mutex<Option<usize>>,
    changed: Notify,
}

/// A sink that keeps every record it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    inner: Arc<Recorded>,
}

impl RecordingSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every write after the first `n` succeeded.
    #[must_use]
    pub fn fail_after(self, n: usize) -> Self {
        *self.inner.fail_after.lock() = Some(n);
        self
    }

    /// Start failing every write from now on.
    pub fn close(&self) {
        let records = self.inner.records.lock();
        *self.inner.fail_after.lock() = Some(records.len());
    }

    /// Raw records received so far.
    #[must_use]
    pub fn records(&self) -> Vec<Vec<u8>> {
        self.inner.records.lock().clone()
    }

    /// Records received so far, decoded lossily.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.inner
            .records
            .lock()
            .iter()
            .map(|r| String::from_utf8_lossy(r).into_owned())
            .collect()
    }

    /// Number of records received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.records.lock().len()
    }

    /// Whether nothing was received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `n` records arrived or `timeout` elapsed.
    ///
    /// Returns whether the count was reached.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let reached = async {
            loop {
                let changed = self.inner.changed.notified();
                if self.len() >= n {
                    return;
                }
                changed.await;
            }
        };
        tokio::time::timeout(timeout, reached).await.is_ok()
    }
}

impl RecordSink for RecordingSink {
    async fn send(&self, record: Vec<u8>) -> Result<(), SinkError> {
        {
            let mut records = self.inner.records.lock();
            if let Some(limit) = *self.inner.fail_after.lock() {
                if records.len() >= limit {
                    return Err(SinkError::Closed);
                }
            }
            records.push(record);
        }
        self.inner.changed.notify_waiters();
        Ok(())
    }
}

// ==================== ScriptedContainerLogs ====================

/// What a scripted container log does after its scripted frames.
#[derive(Debug, Clone)]
pub enum ScriptTail {
    /// End the stream.
    End,
    /// Never yield again, like an idle followed log.
    Pending,
    /// Fail with a daemon error.
    Fail(String),
    /// Yield `payload` every `interval`, forever.
    Repeat {
        /// Record to repeat.
        payload: Vec<u8>,
        /// Delay before each record.
        interval: Duration,
    },
}

#[derive(Debug, Clone)]
struct Script {
    frames: Vec<Vec<u8>>,
    tail: ScriptTail,
}

/// Decrements the open-stream counter when a scripted stream is dropped.
#[derive(Debug)]
struct OpenGuard(Arc<AtomicUsize>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Container logs served from in-memory scripts.
///
/// Opening an unknown container fails like the daemon does for a missing
/// container. Every open stream is counted until it is dropped.
#[derive(Debug, Default)]
pub struct ScriptedContainerLogs {
    scripts: HashMap<String, Script>,
    open_delay: Option<Duration>,
    queries: Mutex<Vec<(String, ContainerLogQuery)>>,
    open: Arc<AtomicUsize>,
    opened: AtomicUsize,
}

impl ScriptedContainerLogs {
    /// Create a source with no containers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the log of `container`.
    #[must_use]
    pub fn with_script(
        mut self,
        container: impl Into<String>,
        frames: Vec<Vec<u8>>,
        tail: ScriptTail,
    ) -> Self {
        self.scripts
            .insert(container.into(), Script { frames, tail });
        self
    }

    /// Delay every open by `delay`.
    #[must_use]
    pub const fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Every open so far, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<(String, ContainerLogQuery)> {
        self.queries.lock().clone()
    }

    /// Streams opened and not yet dropped.
    #[must_use]
    pub fn open_streams(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Streams opened in total.
    #[must_use]
    pub fn total_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl ContainerLogSource for ScriptedContainerLogs {
    async fn open(&self, container: &str, query: &ContainerLogQuery) -> SourceResult<FrameStream> {
        self.queries
            .lock()
            .push((container.to_string(), query.clone()));

        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }

        let script = self
            .scripts
            .get(container)
            .cloned()
            .ok_or_else(|| SourceError::Docker(format!("No such container: {container}")))?;

        self.open.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        let guard = OpenGuard(Arc::clone(&self.open));

        let head = stream::iter(
            script
                .frames
                .into_iter()
                .map(Ok),
        );
        let frames = head.chain(tail_stream(script.tail));

        Ok(frames
            .map(move |item| {
                let _open = &guard;
                item
            })
            .boxed())
    }
}

fn tail_stream(tail: ScriptTail) -> FrameStream {
    match tail {
        ScriptTail::End => stream::empty().boxed(),
        ScriptTail::Pending => stream::pending().boxed(),
        ScriptTail::Fail(reason) => stream::iter([Err(SourceError::Docker(reason))]).boxed(),
        ScriptTail::Repeat { payload, interval } => stream::unfold((), move |()| {
            let payload = payload.clone();
            async move {
                tokio::time::sleep(interval).await;
                Some((Ok(payload), ()))
            }
        })
        .boxed(),
    }
}

// ==================== ScriptedJournal ====================

/// A journal reader replaced by a `sh -c` script.
///
/// The script ignores the unit and mode; both are recorded for assertions.
#[derive(Debug)]
pub struct ScriptedJournal {
    script: String,
    invocations: Mutex<Vec<(String, RequestMode)>>,
}

impl ScriptedJournal {
    /// Run `script` for every request.
    #[must_use]
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Every `(unit, mode)` a command was built for.
    #[must_use]
    pub fn invocations(&self) -> Vec<(String, RequestMode)> {
        self.invocations.lock().clone()
    }
}

impl ServiceCommand for ScriptedJournal {
    fn program(&self) -> &str {
        "sh"
    }

    fn command(&self, unit: &str, mode: &RequestMode) -> Command {
        self.invocations
            .lock()
            .push((unit.to_string(), mode.clone()));
        let mut command = Command::new("sh");
        command.arg("-c").arg(&self.script);
        command
    }
}
