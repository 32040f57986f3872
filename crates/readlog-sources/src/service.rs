//! Service log producers backed by a journal reader process.
//!
//! The reader is started without a shell. A dedicated task reads its stdout
//! line by line into a bounded queue that the producer drains, so a slow
//! client applies backpressure to the pipe instead of buffering without
//! limit.

use std::process::Stdio;
use std::sync::Arc;

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use readlog_proto::{HistoryQuery, RequestMode, FOLLOW_BACKLOG_LINES};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{SourceError, SourceResult};
use crate::producer::{forward_all, forward_history, ProducerExit};
use crate::sink::RecordSink;

/// Capacity of the queue between the line reader and the producer.
pub const LINE_QUEUE_CAPACITY: usize = 100;

/// Default journal reader program.
pub const DEFAULT_JOURNALCTL: &str = "journalctl";

type RecordStream = BoxStream<'static, SourceResult<Vec<u8>>>;

/// Builds the process that prints a unit's journal.
pub trait ServiceCommand: Send + Sync + 'static {
    /// Program name, for diagnostics.
    fn program(&self) -> &str;

    /// Command printing the journal of `unit` for `mode`, one record per line.
    fn command(&self, unit: &str, mode: &RequestMode) -> Command;
}

/// The systemd `journalctl` reader.
#[derive(Debug, Clone)]
pub struct Journalctl {
    program: String,
}

impl Journalctl {
    /// Use `journalctl` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_program(DEFAULT_JOURNALCTL)
    }

    /// Use a specific binary.
    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for reading `unit` in `mode`.
    ///
    /// Time bounds are passed through untouched; journalctl parses its own
    /// formats and interprets naive times in local time.
    #[must_use]
    pub fn args(unit: &str, mode: &RequestMode) -> Vec<String> {
        match mode {
            RequestMode::Follow => vec![
                "--follow".to_string(),
                format!("--lines={FOLLOW_BACKLOG_LINES}"),
                "--no-pager".to_string(),
                format!("--unit={unit}"),
            ],
            RequestMode::History(query) => {
                let mut args = vec!["--no-pager".to_string()];
                if let Some(since) = &query.since {
                    args.push(format!("--since={since}"));
                }
                if let Some(until) = &query.until {
                    args.push(format!("--until={until}"));
                }
                args.push(format!("--unit={unit}"));
                args
            }
        }
    }
}

impl Default for Journalctl {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceCommand for Journalctl {
    fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, unit: &str, mode: &RequestMode) -> Command {
        let mut command = Command::new(&self.program);
        command.args(Self::args(unit, mode));
        command
    }
}

/// A running journal reader process and its line-reader task.
struct JournalReader {
    program: String,
    child: Child,
    reader: JoinHandle<()>,
    reader_cancel: CancellationToken,
}

impl JournalReader {
    /// Start the process and its reader. The reader stops when `cancel` is
    /// raised or the returned stream is dropped.
    fn spawn<J: ServiceCommand>(
        commands: &J,
        unit: &str,
        mode: &RequestMode,
        cancel: &CancellationToken,
    ) -> SourceResult<(Self, RecordStream)> {
        let program = commands.program().to_string();
        let mut child = commands
            .command(unit, mode)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SourceError::spawn(&program, e.to_string()))?;

        debug!(program = %program, unit = %unit, pid = ?child.id(), "Journal reader started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::MissingStdout(program.clone()))?;

        let (tx, rx) = mpsc::channel(LINE_QUEUE_CAPACITY);
        let reader_cancel = cancel.child_token();
        let reader = tokio::spawn(read_lines(stdout, tx, reader_cancel.clone()));

        let records = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();

        Ok((
            Self {
                program,
                child,
                reader,
                reader_cancel,
            },
            records,
        ))
    }

    /// Stop the reader, then make sure the process is gone and reaped.
    async fn shutdown(mut self) {
        self.reader_cancel.cancel();
        if let Err(e) = self.reader.await {
            warn!(program = %self.program, error = %e, "Journal line reader failed");
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(program = %self.program, status = %status, "Journal reader exited");
            }
            Ok(None) => {
                if let Err(e) = self.child.kill().await {
                    warn!(program = %self.program, error = %e, "Failed to kill journal reader");
                } else {
                    debug!(program = %self.program, "Journal reader killed");
                }
            }
            Err(e) => {
                warn!(program = %self.program, error = %e, "Failed to poll journal reader");
            }
        }
    }
}

/// Read newline-delimited records into `tx` until EOF, an error, a closed
/// queue or cancellation.
async fn read_lines(
    stdout: ChildStdout,
    tx: mpsc::Sender<SourceResult<Vec<u8>>>,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(stdout).split(b'\n');
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            next = lines.next_segment() => next,
        };

        let (item, last) = match next {
            Ok(Some(mut line)) => {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                (Ok(line), false)
            }
            Ok(None) => return,
            Err(e) => (Err(SourceError::from(e)), true),
        };

        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            sent = tx.send(item) => sent,
        };
        if sent.is_err() || last {
            return;
        }
    }
}

/// Live-tail a unit's journal until cancelled, the reader exits, or a write
/// fails.
pub async fn follow_service<J, S>(
    commands: Arc<J>,
    unit: String,
    sink: S,
    cancel: CancellationToken,
) -> ProducerExit
where
    J: ServiceCommand,
    S: RecordSink,
{
    let (reader, records) =
        match JournalReader::spawn(commands.as_ref(), &unit, &RequestMode::Follow, &cancel) {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!(unit = %unit, error = %e, "Failed to start journal reader");
                return ProducerExit::UpstreamFailed;
            }
        };

    let exit = forward_all(records, &sink, &cancel).await;
    reader.shutdown().await;
    exit
}

/// Read a bounded, filtered window of a unit's journal, ending with the
/// sentinel.
pub async fn service_history<J, S>(
    commands: Arc<J>,
    unit: String,
    query: HistoryQuery,
    sink: S,
    cancel: CancellationToken,
) -> ProducerExit
where
    J: ServiceCommand,
    S: RecordSink,
{
    let mode = RequestMode::History(query.clone());
    match JournalReader::spawn(commands.as_ref(), &unit, &mode, &cancel) {
        Ok((reader, records)) => {
            let exit = forward_history(records, &query, &sink, &cancel).await;
            reader.shutdown().await;
            exit
        }
        Err(e) => {
            warn!(unit = %unit, error = %e, "Failed to start journal reader");
            forward_history(stream::empty(), &query, &sink, &cancel).await;
            ProducerExit::UpstreamFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, ScriptedJournal};
    use readlog_proto::SENTINEL;
    use std::time::Duration;

    // ==================== Argument Tests ====================

    #[test]
    fn test_follow_args() {
        let args = Journalctl::args("nginx", &RequestMode::Follow);
        assert_eq!(
            args,
            vec!["--follow", "--lines=50", "--no-pager", "--unit=nginx"]
        );
    }

    #[test]
    fn test_history_args_with_bounds() {
        let query = HistoryQuery::new()
            .with_since("2024-05-01 08:00:00")
            .with_until("1 hour ago");
        let args = Journalctl::args("cron", &RequestMode::History(query));
        assert_eq!(
            args,
            vec![
                "--no-pager",
                "--since=2024-05-01 08:00:00",
                "--until=1 hour ago",
                "--unit=cron"
            ]
        );
    }

    #[test]
    fn test_history_args_without_bounds() {
        let args = Journalctl::args("cron", &RequestMode::History(HistoryQuery::new()));
        assert_eq!(args, vec!["--no-pager", "--unit=cron"]);
    }

    #[test]
    fn test_unit_is_a_single_argument() {
        let args = Journalctl::args("a; rm -rf /", &RequestMode::Follow);
        assert_eq!(args.last().map(String::as_str), Some("--unit=a; rm -rf /"));
    }

    #[test]
    fn test_default_program() {
        assert_eq!(Journalctl::default().program(), DEFAULT_JOURNALCTL);
        assert_eq!(Journalctl::with_program("/usr/bin/jc").program(), "/usr/bin/jc");
    }

    // ==================== Follow Tests ====================

    #[cfg(unix)]
    #[tokio::test]
    async fn test_follow_forwards_lines() {
        let journal = Arc::new(ScriptedJournal::new(r"printf 'a\nb\r\nc'"));
        let sink = RecordingSink::new();

        let exit = follow_service(
            journal.clone(),
            "nginx".to_string(),
            sink.clone(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(exit, ProducerExit::Ended);
        assert_eq!(sink.lines(), vec!["a", "b", "c"]);
        assert_eq!(
            journal.invocations(),
            vec![("nginx".to_string(), RequestMode::Follow)]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_follow_cancel_stops_process() {
        let journal = Arc::new(ScriptedJournal::new("echo $$; exec sleep 30"));
        let sink = RecordingSink::new();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(follow_service(
            journal,
            "nginx".to_string(),
            sink.clone(),
            cancel.clone(),
        ));

        assert!(sink.wait_for(1, Duration::from_secs(5)).await);
        cancel.cancel();

        let exit = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("stop must not wait for the process to exit on its own")
            .unwrap();
        assert_eq!(exit, ProducerExit::Cancelled);

        #[cfg(target_os = "linux")]
        {
            let pid = sink.lines()[0].trim().to_string();
            assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists());
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_follow_write_failure_stops_process() {
        let journal = Arc::new(ScriptedJournal::new("while true; do echo tick; sleep 0.05; done"));
        let sink = RecordingSink::new().fail_after(2);

        let exit = tokio::time::timeout(
            Duration::from_secs(5),
            follow_service(
                journal,
                "nginx".to_string(),
                sink.clone(),
                CancellationToken::new(),
            ),
        )
        .await
        .expect("producer must end after a failed write");

        assert_eq!(exit, ProducerExit::TransportClosed);
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn test_follow_spawn_failure() {
        let journal = Arc::new(Journalctl::with_program("/nonexistent/readlog-journalctl"));
        let sink = RecordingSink::new();

        let exit = follow_service(
            journal,
            "nginx".to_string(),
            sink.clone(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(exit, ProducerExit::UpstreamFailed);
        assert!(sink.is_empty());
    }

    // ==================== History Tests ====================

    #[cfg(unix)]
    #[tokio::test]
    async fn test_history_quota_and_sentinel() {
        let journal = Arc::new(ScriptedJournal::new(
            "for i in 1 2 3 4 5; do echo \"line $i\"; done",
        ));
        let sink = RecordingSink::new();

        let exit = service_history(
            journal,
            "cron".to_string(),
            HistoryQuery::new().with_limit(3),
            sink.clone(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(exit, ProducerExit::Exhausted);
        assert_eq!(sink.lines(), vec!["line 1", "line 2", "line 3", SENTINEL]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_history_filter_in_process() {
        let journal = Arc::new(ScriptedJournal::new(
            r"printf 'INFO up\nERROR disk\nINFO ok\nERROR net\n'",
        ));
        let sink = RecordingSink::new();

        let exit = service_history(
            journal.clone(),
            "cron".to_string(),
            HistoryQuery::new().with_filter("ERROR"),
            sink.clone(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(exit, ProducerExit::Ended);
        assert_eq!(sink.lines(), vec!["ERROR disk", "ERROR net", SENTINEL]);
        assert!(matches!(
            journal.invocations()[0].1,
            RequestMode::History(ref q) if q.filter == "ERROR"
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_history_cancel_sends_sentinel() {
        let journal = Arc::new(ScriptedJournal::new("echo first; exec sleep 30"));
        let sink = RecordingSink::new();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(service_history(
            journal,
            "cron".to_string(),
            HistoryQuery::new(),
            sink.clone(),
            cancel.clone(),
        ));

        assert!(sink.wait_for(1, Duration::from_secs(5)).await);
        cancel.cancel();

        let exit = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("history read must stop promptly")
            .unwrap();
        assert_eq!(exit, ProducerExit::Cancelled);
        assert_eq!(sink.lines(), vec!["first", SENTINEL]);
    }

    #[tokio::test]
    async fn test_history_spawn_failure_sends_sentinel() {
        let journal = Arc::new(Journalctl::with_program("/nonexistent/readlog-journalctl"));
        let sink = RecordingSink::new();

        let exit = service_history(
            journal,
            "cron".to_string(),
            HistoryQuery::new(),
            sink.clone(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(exit, ProducerExit::UpstreamFailed);
        assert_eq!(sink.lines(), vec![SENTINEL]);
    }
}
