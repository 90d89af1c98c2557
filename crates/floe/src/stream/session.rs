//! Caller-facing handle on one append stream.

use std::sync::Arc;

use snafu::prelude::*;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use floe_core::RetryPolicy;

use super::driver::{DriverConfig, StreamDriver};
use super::transport::{StreamName, WriteTransportRef};
use super::{AppendBatch, StreamMode};
use crate::error::{
    ConnectSnafu, CreateStreamSnafu, DriverJoinSnafu, FinalizeSnafu, InvalidBatchSnafu,
    OffsetNotSupportedSnafu, ReconcileSnafu, StreamClosedSnafu, StreamError,
};
use crate::schema::TableSchema;
use crate::table::TableRef;
use crate::tracker::{AppendHandle, InflightEntry};

/// Tunables for [`AppendSession::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub mode: StreamMode,
    /// Batches sent but not yet acknowledged before `append` applies backpressure.
    pub max_inflight: usize,
    pub retry: RetryPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            mode: StreamMode::default(),
            max_inflight: 8,
            retry: RetryPolicy::default(),
        }
    }
}

impl SessionOptions {
    pub fn with_mode(mut self, mode: StreamMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_inflight(mut self, max_inflight: usize) -> Self {
        self.max_inflight = max_inflight;
        self
    }
}

/// An open append stream bound to one table and one writer schema.
///
/// `append` takes `&mut self`, so sends are serialized by the borrow checker.
/// The returned handles can be awaited concurrently with further appends.
/// Call [`close`](Self::close) exactly once on every exit path; a session
/// dropped without closing still drains its in-flight batches in the
/// background but never finalizes its stream.
pub struct AppendSession {
    transport: WriteTransportRef,
    table: TableRef,
    stream: StreamName,
    mode: StreamMode,
    schema: Arc<TableSchema>,
    next_offset: Option<i64>,
    next_request_id: u64,
    commands: Option<mpsc::Sender<InflightEntry>>,
    driver: Option<JoinHandle<()>>,
}

impl AppendSession {
    /// Create a stream on the schema's table and connect to it.
    pub async fn open(
        transport: WriteTransportRef,
        schema: Arc<TableSchema>,
        options: SessionOptions,
    ) -> Result<Self, StreamError> {
        let table = schema.table().clone();

        let stream = transport
            .create_stream(&table, options.mode)
            .await
            .context(CreateStreamSnafu {
                table: table.to_string(),
            })?;
        let channel = transport.open_channel(&stream).await.context(ConnectSnafu {
            stream: stream.to_string(),
        })?;

        let next_offset = match options.mode {
            StreamMode::Default => None,
            StreamMode::CommittedExplicit => {
                let tail = transport
                    .stream_tail(&stream)
                    .await
                    .context(ReconcileSnafu {
                        stream: stream.to_string(),
                    })?;
                Some(tail)
            }
        };

        let max_inflight = options.max_inflight.max(1);
        let (commands, command_rx) = mpsc::channel(max_inflight);
        let driver = StreamDriver::spawn(
            DriverConfig {
                transport: Arc::clone(&transport),
                stream: stream.clone(),
                writer_schema: schema.handshake().bytes().clone(),
                retry: options.retry,
                max_inflight,
                target: table.label(),
            },
            channel,
            command_rx,
        );

        info!(
            table = %table,
            stream = %stream,
            mode = options.mode.as_str(),
            "Opened append stream"
        );

        Ok(Self {
            transport,
            table,
            stream,
            mode: options.mode,
            schema,
            next_offset,
            next_request_id: 0,
            commands: Some(commands),
            driver: Some(driver),
        })
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn stream(&self) -> &StreamName {
        &self.stream
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// The schema the session was opened with; it never changes.
    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// Offset the next unpinned batch will be assigned (explicit mode only).
    pub fn next_offset(&self) -> Option<i64> {
        self.next_offset
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_none()
    }

    /// Queue `batch` for append and return a handle to its result.
    ///
    /// Returns as soon as the driver has accepted the batch; this only waits
    /// when `max_inflight` batches are already outstanding. In explicit mode a
    /// batch without an offset continues from the previous one.
    pub async fn append(&mut self, batch: AppendBatch) -> Result<AppendHandle, StreamError> {
        let commands = self.commands.as_ref().context(StreamClosedSnafu {
            stream: self.stream.to_string(),
        })?;
        ensure!(
            !batch.is_empty(),
            InvalidBatchSnafu {
                stream: self.stream.to_string(),
                message: "batch has no records",
            }
        );

        let row_count = batch.len();
        let offset = match (self.mode, batch.offset()) {
            (StreamMode::Default, Some(_)) => {
                return OffsetNotSupportedSnafu {
                    stream: self.stream.to_string(),
                }
                .fail();
            }
            (StreamMode::Default, None) => None,
            (StreamMode::CommittedExplicit, Some(offset)) => {
                ensure!(
                    offset >= 0,
                    InvalidBatchSnafu {
                        stream: self.stream.to_string(),
                        message: format!("negative offset {offset}"),
                    }
                );
                Some(offset)
            }
            (StreamMode::CommittedExplicit, None) => self.next_offset,
        };
        let next_offset = match offset {
            Some(offset) => {
                let end = i64::try_from(row_count)
                    .ok()
                    .and_then(|rows| offset.checked_add(rows))
                    .context(InvalidBatchSnafu {
                        stream: self.stream.to_string(),
                        message: format!("offset range overflows: {offset} + {row_count} rows"),
                    })?;
                Some(end)
            }
            None => None,
        };

        let request_id = self.next_request_id;
        let (reply, rx) = oneshot::channel();
        let entry = InflightEntry::new(request_id, batch.into_rows().into(), offset, reply);

        if commands.send(entry).await.is_err() {
            return StreamClosedSnafu {
                stream: self.stream.to_string(),
            }
            .fail();
        }

        self.next_request_id += 1;
        if next_offset.is_some() {
            self.next_offset = next_offset;
        }
        debug!(
            stream = %self.stream,
            request_id,
            rows = row_count,
            offset = ?offset,
            "Queued batch"
        );

        Ok(AppendHandle::new(request_id, row_count, offset, rx))
    }

    /// Re-read the stream tail and continue explicit offsets from it.
    ///
    /// Use after an `OffsetConflict`, once the outstanding handles have
    /// resolved. Returns the tail.
    pub async fn reconcile(&mut self) -> Result<i64, StreamError> {
        ensure!(
            !self.is_closed(),
            StreamClosedSnafu {
                stream: self.stream.to_string(),
            }
        );

        let tail = self
            .transport
            .stream_tail(&self.stream)
            .await
            .context(ReconcileSnafu {
                stream: self.stream.to_string(),
            })?;
        if self.mode == StreamMode::CommittedExplicit {
            self.next_offset = Some(tail);
        }

        info!(stream = %self.stream, tail, "Reconciled append stream");
        Ok(tail)
    }

    /// Wait for every outstanding batch to resolve, then release the stream.
    ///
    /// Explicit-mode streams are finalized; the store-managed default stream
    /// is left open. A second call fails with `StreamClosed`.
    pub async fn close(&mut self) -> Result<(), StreamError> {
        let commands = self.commands.take().context(StreamClosedSnafu {
            stream: self.stream.to_string(),
        })?;
        drop(commands);

        if let Some(driver) = self.driver.take() {
            driver.await.context(DriverJoinSnafu {
                stream: self.stream.to_string(),
            })?;
        }

        if self.mode == StreamMode::CommittedExplicit {
            let rows = self
                .transport
                .finalize_stream(&self.stream)
                .await
                .context(FinalizeSnafu {
                    stream: self.stream.to_string(),
                })?;
            info!(stream = %self.stream, rows, "Finalized append stream");
        }

        info!(table = %self.table, stream = %self.stream, "Closed append stream");
        Ok(())
    }
}

impl Drop for AppendSession {
    fn drop(&mut self) {
        if self.commands.is_some() {
            warn!(
                stream = %self.stream,
                "Append session dropped without close; in-flight batches drain in the background"
            );
        }
    }
}
