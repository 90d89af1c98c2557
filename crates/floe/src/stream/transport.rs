//! Boundary between the session and the remote store.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::StreamMode;
use crate::error::TransportError;
use crate::schema::RemoteTableSchema;
use crate::table::TableRef;

/// A reference-counted transport.
pub type WriteTransportRef = Arc<dyn WriteTransport>;

/// Fully qualified stream identity, e.g. `projects/p/.../streams/_default`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamName(String);

impl StreamName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The store-managed stream of `table` with store-assigned offsets.
    pub fn default_for(table: &TableRef) -> Self {
        Self(format!("{}/streams/_default", table.path()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One append request on a channel.
#[derive(Debug, Clone)]
pub struct AppendRequest {
    /// Correlates the response; unique per session, stable across resends.
    pub request_id: u64,
    pub stream: StreamName,
    /// Serialized descriptor; set on the first request of every connection.
    pub writer_schema: Option<Bytes>,
    pub rows: Arc<[Bytes]>,
    pub offset: Option<i64>,
}

/// Store status codes an append can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Connection-level failure; the request may or may not have been applied.
    Unavailable,
    /// Transient server-side failure.
    Internal,
    /// The explicit offset is below the stream tail.
    AlreadyExists,
    /// The explicit offset is beyond the stream tail.
    OutOfRange,
    InvalidArgument,
    NotFound,
    FailedPrecondition,
}

impl StatusCode {
    pub fn is_transient(&self) -> bool {
        matches!(self, StatusCode::Unavailable | StatusCode::Internal)
    }

    pub fn is_offset_conflict(&self) -> bool {
        matches!(self, StatusCode::AlreadyExists | StatusCode::OutOfRange)
    }
}

/// Structured error carried by an append response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStatus {
    pub code: StatusCode,
    pub message: String,
}

impl StoreStatus {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

/// Response to one [`AppendRequest`].
#[derive(Debug, Clone)]
pub struct AppendResponse {
    pub request_id: u64,
    /// Starting offset of the applied rows, or why nothing was applied.
    pub result: Result<i64, StoreStatus>,
}

/// Duplex connection to one stream.
///
/// Requests are applied in send order. Responses may arrive in any order and
/// are matched by `request_id`. The store closes `responses` when the
/// connection breaks.
pub struct AppendChannel {
    pub requests: mpsc::Sender<AppendRequest>,
    pub responses: mpsc::Receiver<AppendResponse>,
}

/// Operations the remote store exposes to the writer.
#[async_trait]
pub trait WriteTransport: Send + Sync {
    /// Fetch the full schema view of `table`.
    async fn fetch_schema(&self, table: &TableRef) -> Result<RemoteTableSchema, TransportError>;

    /// Create (or look up, for [`StreamMode::Default`]) a stream on `table`.
    async fn create_stream(
        &self,
        table: &TableRef,
        mode: StreamMode,
    ) -> Result<StreamName, TransportError>;

    /// Open a duplex append channel bound to `stream`.
    async fn open_channel(&self, stream: &StreamName) -> Result<AppendChannel, TransportError>;

    /// Number of rows currently in `stream`, i.e. the next offset it accepts.
    async fn stream_tail(&self, stream: &StreamName) -> Result<i64, TransportError>;

    /// Release `stream`; no further appends are accepted. Returns the final row count.
    async fn finalize_stream(&self, stream: &StreamName) -> Result<i64, TransportError>;
}
