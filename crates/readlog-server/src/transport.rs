//! Write side of a client connection.

use std::fmt;
use std::sync::Arc;

use futures::{Sink, SinkExt};
use readlog_proto::ReplyFraming;
use readlog_sources::{RecordSink, SinkError};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Hands out record sinks that write to one client.
pub trait Transport: Send + Sync + 'static {
    /// Sink given to producers.
    type Sink: RecordSink + Clone;

    /// A sink that frames every record as `framing`.
    fn framed(&self, framing: ReplyFraming) -> Self::Sink;
}

/// Convert a record to a WebSocket message.
#[must_use]
pub fn record_to_ws(record: Vec<u8>, framing: ReplyFraming) -> WsMessage {
    match framing {
        ReplyFraming::Binary => WsMessage::Binary(record),
        ReplyFraming::Text => match String::from_utf8(record) {
            Ok(text) => WsMessage::Text(text),
            Err(e) => WsMessage::Text(String::from_utf8_lossy(e.as_bytes()).into_owned()),
        },
    }
}

/// Transport over the write half of a WebSocket.
#[derive(Debug)]
pub struct WsTransport<S> {
    sink: Arc<Mutex<S>>,
}

impl<S> WsTransport<S> {
    /// Wrap the write half of a connection.
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }
}

impl<S> Transport for WsTransport<S>
where
    S: Sink<WsMessage> + Unpin + Send + 'static,
    S::Error: fmt::Display,
{
    type Sink = WsRecordSink<S>;

    fn framed(&self, framing: ReplyFraming) -> Self::Sink {
        WsRecordSink {
            sink: Arc::clone(&self.sink),
            framing,
        }
    }
}

/// Record sink writing framed messages to a shared WebSocket write half.
#[derive(Debug)]
pub struct WsRecordSink<S> {
    sink: Arc<Mutex<S>>,
    framing: ReplyFraming,
}

impl<S> WsRecordSink<S> {
    /// Framing applied to every record.
    pub const fn framing(&self) -> ReplyFraming {
        self.framing
    }
}

impl<S> Clone for WsRecordSink<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            framing: self.framing,
        }
    }
}

impl<S> RecordSink for WsRecordSink<S>
where
    S: Sink<WsMessage> + Unpin + Send + 'static,
    S::Error: fmt::Display,
{
    async fn send(&self, record: Vec<u8>) -> Result<(), SinkError> {
        let message = record_to_ws(record, self.framing);
        self.sink
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| SinkError::Write(e.to_string()))
    }
}
