//! WebSocket log server implementation.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use readlog_proto::ReplyFraming;
use readlog_sources::{ContainerLogSource, LogSources, ServiceCommand};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, Semaphore};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::session::{RequestOutcome, SessionController};
use crate::transport::WsTransport;

/// Active session tracking information.
#[derive(Debug, Clone, Copy)]
pub struct SessionInfo {
    /// Remote address.
    pub peer: SocketAddr,
    /// When the WebSocket handshake completed.
    pub connected_at: DateTime<Utc>,
}

type SessionMap = Arc<RwLock<HashMap<Uuid, SessionInfo>>>;

/// Log server accepting browser WebSocket connections.
#[derive(Debug)]
pub struct LogServer<C, J> {
    /// Server configuration.
    config: Arc<ServerConfig>,
    /// Backends producers are drawn from.
    sources: LogSources<C, J>,
    /// Active sessions indexed by session ID.
    sessions: SessionMap,
    /// One permit per allowed connection, taken before the handshake.
    slots: Arc<Semaphore>,
    /// Raised to stop accepting and close every session.
    shutdown: CancellationToken,
}

impl<C, J> LogServer<C, J>
where
    C: ContainerLogSource,
    J: ServiceCommand,
{
    /// Create a new log server.
    pub fn new(config: ServerConfig, sources: LogSources<C, J>) -> Self {
        let slots = Arc::new(Semaphore::new(
            config.max_connections.min(Semaphore::MAX_PERMITS),
        ));
        Self {
            config: Arc::new(config),
            sources,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            slots,
            shutdown: CancellationToken::new(),
        }
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the number of active sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Snapshot of the active sessions.
    pub async fn sessions(&self) -> Vec<(Uuid, SessionInfo)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, info)| (*id, *info))
            .collect()
    }

    /// Bind the configured address.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(&self) -> ServerResult<TcpListener> {
        let addr = self.config.bind_addr;
        TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(addr, e))
    }

    /// Bind the configured address and serve until shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn serve(&self) -> ServerResult<()> {
        let listener = self.bind().await?;
        self.serve_on(listener).await
    }

    /// Serve connections from an already bound listener until shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener has no local address.
    pub async fn serve_on(&self, listener: TcpListener) -> ServerResult<()> {
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        info!(addr = %addr, path = %self.config.ws_path, "Log server listening");

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            self.handle_connection(stream, peer_addr);
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                () = self.shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!("Log server shutting down");
        Ok(())
    }

    /// Stop accepting connections and close every session.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Token raised by [`shutdown`](Self::shutdown).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Connections that can still be accepted.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Handle a new TCP connection.
    fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        debug!(peer = %peer_addr, "New connection");

        // The slot is held until the connection task ends, so concurrent
        // handshakes cannot overshoot the limit.
        let Ok(slot) = Arc::clone(&self.slots).try_acquire_owned() else {
            warn!(
                peer = %peer_addr,
                max = self.config.max_connections,
                "Connection rejected: max connections reached"
            );
            return;
        };

        let config = Arc::clone(&self.config);
        let sources = self.sources.clone();
        let sessions = Arc::clone(&self.sessions);
        let shutdown = self.shutdown.clone();

        // The handshake runs on the connection's own task so a slow client
        // cannot stall the accept loop.
        tokio::spawn(async move {
            let _slot = slot;
            let endpoint = Arc::clone(&config);
            let check_path = move |request: &Request, response: Response| {
                if endpoint.is_ws_path(request.uri().path()) {
                    Ok(response)
                } else {
                    Err(not_found())
                }
            };

            let ws_stream = match accept_hdr_async(stream, check_path).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "WebSocket handshake failed");
                    return;
                }
            };

            match run_connection(ws_stream, peer_addr, sources, &config, &sessions, &shutdown).await
            {
                Ok(()) => debug!(peer = %peer_addr, "Connection closed normally"),
                Err(e) => warn!(peer = %peer_addr, error = %e, "Connection ended with error"),
            }
        });
    }
}

fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("not found".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

/// Drive one session until the client leaves, the session fails, or the
/// server shuts down.
async fn run_connection<C, J>(
    ws_stream: WebSocketStream<TcpStream>,
    peer_addr: SocketAddr,
    sources: LogSources<C, J>,
    config: &ServerConfig,
    sessions: &SessionMap,
    shutdown: &CancellationToken,
) -> ServerResult<()>
where
    C: ContainerLogSource,
    J: ServiceCommand,
{
    let (ws_sink, mut incoming) = ws_stream.split();
    let mut controller = SessionController::new(sources, WsTransport::new(ws_sink), config);
    let session_id = controller.id();

    sessions.write().await.insert(
        session_id,
        SessionInfo {
            peer: peer_addr,
            connected_at: controller.connected_at(),
        },
    );
    info!(session_id = %session_id, peer = %peer_addr, "Session opened");

    let result = loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => break Ok(()),
            next = incoming.next() => next,
        };

        let (raw, framing) = match next {
            Some(Ok(WsMessage::Text(text))) => (text.into_bytes(), ReplyFraming::Text),
            Some(Ok(WsMessage::Binary(data))) => (data, ReplyFraming::Binary),
            Some(Ok(WsMessage::Close(_))) | None => break Ok(()),
            Some(Ok(_)) => continue,
            Some(Err(e)) => break Err(ServerError::from(e)),
        };

        match controller.on_request(&raw, framing).await {
            Ok(RequestOutcome::Started { label }) => {
                debug!(session_id = %session_id, producer = %label, "Producer switched");
            }
            Ok(RequestOutcome::Keepalive | RequestOutcome::Discarded) => {}
            Err(e) => break Err(e),
        }
    };

    controller.on_close();
    sessions.write().await.remove(&session_id);
    info!(
        session_id = %session_id,
        peer = %peer_addr,
        requests = controller.request_count(),
        "Session closed"
    );

    result
}
