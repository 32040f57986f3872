//! Per-connection session control.
//!
//! A session owns at most one producer. Every accepted request first stops
//! the previous producer and waits until it has released its upstream, so
//! two producers never write to the same client.

use chrono::{DateTime, Utc};
use readlog_proto::{is_keepalive, LogRequest, ReplyFraming};
use readlog_sources::{ContainerLogSource, LogSources, ProducerHandle, ServiceCommand};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::transport::Transport;

/// What a session did with one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A new producer was started.
    Started {
        /// Label of the new producer.
        label: String,
    },
    /// An idle keepalive from the browser.
    Keepalive,
    /// The message was malformed or too large and was discarded.
    Discarded,
}

/// Controller for one client connection.
pub struct SessionController<C, J, T> {
    id: Uuid,
    connected_at: DateTime<Utc>,
    sources: LogSources<C, J>,
    transport: T,
    framing: Option<ReplyFraming>,
    active: Option<ProducerHandle>,
    config: ServerConfig,
    requests: u64,
}

impl<C, J, T> SessionController<C, J, T>
where
    C: ContainerLogSource,
    J: ServiceCommand,
    T: Transport,
{
    /// Create a controller for a new connection.
    pub fn new(sources: LogSources<C, J>, transport: T, config: &ServerConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            connected_at: Utc::now(),
            sources,
            transport,
            framing: None,
            active: None,
            config: config.clone(),
            requests: 0,
        }
    }

    /// Session identifier.
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// When the connection was accepted.
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Reply framing, once the first request fixed it.
    pub const fn framing(&self) -> Option<ReplyFraming> {
        self.framing
    }

    /// Label of the current producer, if any.
    pub fn active_label(&self) -> Option<&str> {
        self.active.as_ref().map(ProducerHandle::label)
    }

    /// Number of requests accepted so far.
    pub const fn request_count(&self) -> u64 {
        self.requests
    }

    /// Handle one inbound message.
    ///
    /// `framing` is the frame type the message arrived in; only the first
    /// accepted request's framing is kept.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::StopTimeout`] if the previous producer did not
    /// stop in time. The session must then be closed.
    pub async fn on_request(
        &mut self,
        raw: &[u8],
        framing: ReplyFraming,
    ) -> ServerResult<RequestOutcome> {
        if !self.config.is_message_size_valid(raw.len()) {
            warn!(
                session_id = %self.id,
                size = raw.len(),
                max = self.config.max_message_size,
                "Discarding oversized control message"
            );
            return Ok(RequestOutcome::Discarded);
        }

        if is_keepalive(raw) {
            debug!(session_id = %self.id, "Keepalive");
            return Ok(RequestOutcome::Keepalive);
        }

        let request = match LogRequest::parse(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Discarding malformed control message");
                return Ok(RequestOutcome::Discarded);
            }
        };

        self.stop_active().await?;

        let framing = *self.framing.get_or_insert(framing);
        let sink = self.transport.framed(framing);

        info!(
            session_id = %self.id,
            kind = %request.kind,
            mode = %request.log_mode(),
            source = %request.source,
            framing = %framing,
            "Starting producer"
        );
        let handle = self.sources.spawn(request, sink);
        let label = handle.label().to_string();
        self.active = Some(handle);
        self.requests += 1;

        Ok(RequestOutcome::Started { label })
    }

    /// Cancel the current producer without waiting for it.
    pub fn on_close(&mut self) {
        if let Some(handle) = self.active.take() {
            debug!(session_id = %self.id, producer = %handle.label(), "Cancelling producer on close");
            handle.cancel();
        }
    }

    /// Stop the current producer and wait until it has released its upstream.
    async fn stop_active(&mut self) -> ServerResult<()> {
        let Some(handle) = self.active.take() else {
            return Ok(());
        };

        let label = handle.label().to_string();
        let timeout = self.config.stop_timeout;
        match tokio::time::timeout(timeout, handle.stop()).await {
            Ok(Ok(exit)) => {
                debug!(session_id = %self.id, producer = %label, exit = %exit, "Producer stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(session_id = %self.id, producer = %label, error = %e, "Producer failed");
                Ok(())
            }
            Err(_) => Err(ServerError::StopTimeout { label, timeout }),
        }
    }
}

impl<C, J, T> Drop for SessionController<C, J, T> {
    fn drop(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use readlog_proto::SENTINEL;
    use readlog_sources::testing::{
        RecordingSink, ScriptTail, ScriptedContainerLogs, ScriptedJournal,
    };
    use std::sync::Arc;
    use std::time::Duration;

    // ==================== Helper Functions ====================

    #[derive(Debug, Clone, Default)]
    struct RecordingTransport {
        sink: RecordingSink,
        framings: Arc<Mutex<Vec<ReplyFraming>>>,
    }

    impl Transport for RecordingTransport {
        type Sink = RecordingSink;

        fn framed(&self, framing: ReplyFraming) -> RecordingSink {
            self.framings.lock().push(framing);
            self.sink.clone()
        }
    }

    type TestController = SessionController<ScriptedContainerLogs, ScriptedJournal, RecordingTransport>;

    fn controller(containers: ScriptedContainerLogs) -> (TestController, RecordingTransport) {
        controller_with(containers, &ServerConfig::default())
    }

    fn controller_with(
        containers: ScriptedContainerLogs,
        config: &ServerConfig,
    ) -> (TestController, RecordingTransport) {
        let transport = RecordingTransport::default();
        let sources = LogSources::new(containers, ScriptedJournal::new("true"));
        (
            SessionController::new(sources, transport.clone(), config),
            transport,
        )
    }

    fn follow(name: &str) -> Vec<u8> {
        format!(r#"{{"log_type":"realtime","service_type":"docker","service_name":"{name}"}}"#)
            .into_bytes()
    }

    fn follow_unit(name: &str) -> Vec<u8> {
        format!(r#"{{"log_type":"realtime","service_type":"systemd","service_name":"{name}"}}"#)
            .into_bytes()
    }

    fn history(name: &str, lines: i64, grep: &str) -> Vec<u8> {
        format!(
            r#"{{"log_type":"history","service_type":"docker","service_name":"{name}","lines":{lines},"grep":"{grep}"}}"#
        )
        .into_bytes()
    }

    fn numbered(n: usize) -> Vec<Vec<u8>> {
        (1..=n).map(|i| format!("line {i}").into_bytes()).collect()
    }

    // ==================== Request Handling Tests ====================

    #[tokio::test]
    async fn test_history_quota_then_sentinel() {
        let (mut session, transport) = controller(
            ScriptedContainerLogs::new().with_script("web", numbered(5), ScriptTail::End),
        );

        let outcome = session
            .on_request(&history("web", 3, ""), ReplyFraming::Text)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RequestOutcome::Started {
                label: "docker:history:web".to_string()
            }
        );

        assert!(transport.sink.wait_for(4, Duration::from_secs(2)).await);
        assert_eq!(
            transport.sink.lines(),
            vec!["line 1", "line 2", "line 3", SENTINEL]
        );
    }

    #[tokio::test]
    async fn test_zero_lines_uses_default_quota() {
        let (mut session, transport) = controller(
            ScriptedContainerLogs::new().with_script("web", numbered(1200), ScriptTail::End),
        );

        session
            .on_request(&history("web", 0, ""), ReplyFraming::Binary)
            .await
            .unwrap();

        assert!(transport.sink.wait_for(1001, Duration::from_secs(5)).await);
        let lines = transport.sink.lines();
        assert_eq!(lines.len(), 1001);
        assert_eq!(lines[999], "line 1000");
        assert_eq!(lines[1000], SENTINEL);
    }

    #[tokio::test]
    async fn test_filter_matching_nothing() {
        let (mut session, transport) = controller(
            ScriptedContainerLogs::new().with_script("web", numbered(5), ScriptTail::End),
        );

        session
            .on_request(&history("web", 10, "absent"), ReplyFraming::Text)
            .await
            .unwrap();

        assert!(transport.sink.wait_for(1, Duration::from_secs(2)).await);
        assert_eq!(transport.sink.lines(), vec![SENTINEL]);
    }

    #[tokio::test]
    async fn test_malformed_then_valid() {
        let (mut session, transport) = controller(
            ScriptedContainerLogs::new().with_script("web", numbered(2), ScriptTail::End),
        );

        let outcome = session
            .on_request(b"{not json", ReplyFraming::Text)
            .await
            .unwrap();
        assert_eq!(outcome, RequestOutcome::Discarded);
        assert!(session.active_label().is_none());
        assert_eq!(session.framing(), None);

        let outcome = session
            .on_request(&history("web", 0, ""), ReplyFraming::Binary)
            .await
            .unwrap();
        assert!(matches!(outcome, RequestOutcome::Started { .. }));
        assert!(transport.sink.wait_for(3, Duration::from_secs(2)).await);
        assert_eq!(session.framing(), Some(ReplyFraming::Binary));
    }

    #[tokio::test]
    async fn test_keepalive_is_ignored() {
        let (mut session, _transport) = controller(ScriptedContainerLogs::new());

        let outcome = session.on_request(b"\"0\"", ReplyFraming::Text).await.unwrap();

        assert_eq!(outcome, RequestOutcome::Keepalive);
        assert_eq!(session.request_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_message_discarded() {
        let config = ServerConfig::default().with_max_message_size(16);
        let (mut session, _transport) = controller_with(
            ScriptedContainerLogs::new().with_script("web", numbered(1), ScriptTail::End),
            &config,
        );

        let outcome = session
            .on_request(&follow("web"), ReplyFraming::Text)
            .await
            .unwrap();

        assert_eq!(outcome, RequestOutcome::Discarded);
        assert!(session.active_label().is_none());
    }

    // ==================== Replacement Tests ====================

    #[tokio::test]
    async fn test_replacement_releases_previous_upstream() {
        let containers = ScriptedContainerLogs::new()
            .with_script(
                "a",
                Vec::new(),
                ScriptTail::Repeat {
                    payload: b"from a".to_vec(),
                    interval: Duration::from_millis(5),
                },
            )
            .with_script("b", vec![b"from b".to_vec()], ScriptTail::Pending);
        let (mut session, transport) = controller(containers);

        session.on_request(&follow("a"), ReplyFraming::Text).await.unwrap();
        assert!(transport.sink.wait_for(3, Duration::from_secs(2)).await);

        session.on_request(&follow("b"), ReplyFraming::Text).await.unwrap();
        assert_eq!(session.active_label(), Some("docker:realtime:b"));

        let sink = transport.sink.clone();
        let saw_b = tokio::time::timeout(Duration::from_secs(2), async move {
            while !sink.lines().iter().any(|l| l == "from b") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(saw_b.is_ok());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let lines = transport.sink.lines();
        let first_b = lines.iter().position(|l| l == "from b").unwrap();
        assert!(lines[first_b..].iter().all(|l| l == "from b"));
        assert!(lines[..first_b].iter().all(|l| l == "from a"));
        assert_eq!(session.sources.containers().open_streams(), 1);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_replacing_service_reaps_journal_process() {
        let transport = RecordingTransport::default();
        let sources = LogSources::new(
            ScriptedContainerLogs::new().with_script(
                "web",
                vec![b"from web".to_vec()],
                ScriptTail::Pending,
            ),
            ScriptedJournal::new("echo $$; exec sleep 30"),
        );
        let mut session =
            SessionController::new(sources, transport.clone(), &ServerConfig::default());

        session
            .on_request(&follow_unit("nginx"), ReplyFraming::Text)
            .await
            .unwrap();
        assert!(transport.sink.wait_for(1, Duration::from_secs(5)).await);
        let pid = transport.sink.lines()[0].trim().to_string();
        let proc_entry = std::path::PathBuf::from(format!("/proc/{pid}"));
        assert!(proc_entry.exists());

        session.on_request(&follow("web"), ReplyFraming::Text).await.unwrap();
        assert!(!proc_entry.exists(), "journal process must be reaped before the switch");

        assert!(transport.sink.wait_for(2, Duration::from_secs(2)).await);
        assert_eq!(transport.sink.lines(), vec![pid, "from web".to_string()]);
    }

    #[tokio::test]
    async fn test_two_rapid_requests_only_second_writes() {
        let containers = ScriptedContainerLogs::new()
            .with_open_delay(Duration::from_millis(50))
            .with_script("a", vec![b"from a".to_vec()], ScriptTail::Pending)
            .with_script("b", vec![b"from b".to_vec()], ScriptTail::Pending);
        let (mut session, transport) = controller(containers);

        session.on_request(&follow("a"), ReplyFraming::Text).await.unwrap();
        session.on_request(&follow("b"), ReplyFraming::Text).await.unwrap();

        assert!(transport.sink.wait_for(1, Duration::from_secs(2)).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.sink.lines(), vec!["from b"]);
        assert_eq!(session.sources.containers().total_opened(), 1);
    }

    #[tokio::test]
    async fn test_framing_fixed_by_first_request() {
        let containers = ScriptedContainerLogs::new()
            .with_script("a", vec![b"x".to_vec()], ScriptTail::Pending);
        let (mut session, transport) = controller(containers);

        session.on_request(&follow("a"), ReplyFraming::Text).await.unwrap();
        session.on_request(&follow("a"), ReplyFraming::Binary).await.unwrap();

        assert_eq!(session.framing(), Some(ReplyFraming::Text));
        assert_eq!(
            *transport.framings.lock(),
            vec![ReplyFraming::Text, ReplyFraming::Text]
        );
    }

    // ==================== Close Tests ====================

    #[tokio::test]
    async fn test_close_during_follow_releases_upstream() {
        let containers = ScriptedContainerLogs::new()
            .with_script("web", vec![b"x".to_vec()], ScriptTail::Pending);
        let (mut session, transport) = controller(containers);

        session.on_request(&follow("web"), ReplyFraming::Text).await.unwrap();
        assert!(transport.sink.wait_for(1, Duration::from_secs(2)).await);
        assert_eq!(session.sources.containers().open_streams(), 1);

        session.on_close();
        assert!(session.active_label().is_none());

        let containers = Arc::clone(session.sources.containers());
        let released = tokio::time::timeout(Duration::from_secs(2), async move {
            while containers.open_streams() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(released.is_ok());
    }

    #[tokio::test]
    async fn test_drop_cancels_producer() {
        let containers = ScriptedContainerLogs::new()
            .with_script("web", vec![b"x".to_vec()], ScriptTail::Pending);
        let (mut session, transport) = controller(containers);

        session.on_request(&follow("web"), ReplyFraming::Text).await.unwrap();
        assert!(transport.sink.wait_for(1, Duration::from_secs(2)).await);

        let containers = Arc::clone(session.sources.containers());
        drop(session);

        let released = tokio::time::timeout(Duration::from_secs(2), async move {
            while containers.open_streams() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(released.is_ok());
    }
}
