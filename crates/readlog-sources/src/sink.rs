//! Destination for produced log records.

use std::future::Future;

use crate::error::SinkError;

/// Write side of a client connection, as seen by a producer.
///
/// A producer owns its sink for its whole lifetime and stops at the first
/// failed write.
pub trait RecordSink: Send + Sync + 'static {
    /// Deliver one record.
    fn send(&self, record: Vec<u8>) -> impl Future<Output = Result<(), SinkError>> + Send;
}
