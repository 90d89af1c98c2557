//! Ordered, offset-aware append streams.
//!
//! An [`AppendSession`] owns one stream on the store. Batches are handed to
//! a background driver that pipelines them over a duplex channel, retries
//! transient failures by resending identical requests, and resolves one
//! [`AppendHandle`](crate::tracker::AppendHandle) per batch.

mod driver;
mod memory;
mod session;
mod transport;

pub use memory::{Fault, MemoryStore};
pub use session::{AppendSession, SessionOptions};
pub use transport::{
    AppendChannel, AppendRequest, AppendResponse, StatusCode, StoreStatus, StreamName,
    WriteTransport, WriteTransportRef,
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::encode::EncodedRecord;

/// How offsets are assigned on a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// The store assigns offsets; delivery is at-least-once.
    #[default]
    Default,
    /// The caller assigns gap-free offsets; retries are deduplicated by offset.
    CommittedExplicit,
}

impl StreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamMode::Default => "default",
            StreamMode::CommittedExplicit => "committed_explicit",
        }
    }
}

/// Ordered encoded records submitted as one append request.
#[derive(Debug, Clone, Default)]
pub struct AppendBatch {
    records: Vec<EncodedRecord>,
    offset: Option<i64>,
}

impl AppendBatch {
    pub fn new(records: Vec<EncodedRecord>) -> Self {
        Self {
            records,
            offset: None,
        }
    }

    /// Pin the batch to start at `offset` (explicit mode only).
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn records(&self) -> &[EncodedRecord] {
        &self.records
    }

    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Input indices of the records, for failure reporting.
    pub fn record_indices(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.index).collect()
    }

    pub(crate) fn into_rows(self) -> Vec<Bytes> {
        self.records.into_iter().map(|r| r.payload).collect()
    }
}
