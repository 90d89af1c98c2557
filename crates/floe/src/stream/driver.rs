//! Background task that owns the append channel of one session.
//!
//! Batches arrive from the session over a bounded command channel and are
//! sent immediately, so up to `max_inflight` requests are pipelined ahead of
//! their acknowledgements. The store applies requests in send order; the
//! driver only has to match responses to entries by request id.
//!
//! When the connection breaks, every unresolved entry is resent in its
//! original order on a fresh connection, with identical rows and offset.
//! An explicit-offset resend that comes back `AlreadyExists` resolves at its
//! offset only when the rows there can be its own: a broken connection must
//! have carried it unanswered, no other batch may claim any of its offsets,
//! and the stream tail must cover it. Anything else is an `OffsetConflict`,
//! so retries neither duplicate rows nor report unwritten ones.
//!
//! The task exits once the command channel is closed and the in-flight
//! queue has drained.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use std::ops::Range;

use tracing::{debug, error, warn};

use floe_core::RetryPolicy;
use floe_core::emit;
use floe_core::metrics::events::{AppendRetried, BatchAppended, BatchFailed, InflightBatches};

use super::transport::{
    AppendChannel, AppendRequest, AppendResponse, StatusCode, StoreStatus, StreamName,
    WriteTransportRef,
};
use crate::error::{AppendError, TransportError};
use crate::tracker::{
    AppendOutcome, ClaimedOffsets, InflightEntry, InflightQueue, ranges_overlap,
};

/// One live connection plus whether it has carried the writer schema yet.
struct Connection {
    requests: mpsc::Sender<AppendRequest>,
    responses: mpsc::Receiver<AppendResponse>,
    schema_sent: bool,
}

impl Connection {
    fn new(channel: AppendChannel) -> Self {
        Self {
            requests: channel.requests,
            responses: channel.responses,
            schema_sent: false,
        }
    }

    /// Send `entry`; `false` means the connection is gone.
    async fn send(&mut self, stream: &StreamName, writer_schema: &Bytes, entry: &InflightEntry) -> bool {
        let request = AppendRequest {
            request_id: entry.request_id,
            stream: stream.clone(),
            writer_schema: (!self.schema_sent).then(|| writer_schema.clone()),
            rows: entry.rows.clone(),
            offset: entry.offset,
        };
        let sent = self.requests.send(request).await.is_ok();
        self.schema_sent |= sent;
        sent
    }
}

/// Static inputs of a driver.
pub(super) struct DriverConfig {
    pub transport: WriteTransportRef,
    pub stream: StreamName,
    pub writer_schema: Bytes,
    pub retry: RetryPolicy,
    pub max_inflight: usize,
    pub target: String,
}

pub(super) struct StreamDriver {
    config: DriverConfig,
    commands: mpsc::Receiver<InflightEntry>,
    connection: Option<Connection>,
    inflight: InflightQueue,
    claimed: ClaimedOffsets,
}

impl StreamDriver {
    /// Spawn the driver on an already established channel.
    pub fn spawn(
        config: DriverConfig,
        channel: AppendChannel,
        commands: mpsc::Receiver<InflightEntry>,
    ) -> JoinHandle<()> {
        let driver = Self {
            config,
            commands,
            connection: Some(Connection::new(channel)),
            inflight: InflightQueue::default(),
            claimed: ClaimedOffsets::default(),
        };
        tokio::spawn(driver.run())
    }

    async fn run(mut self) {
        let mut accepting = true;

        loop {
            if !accepting && self.inflight.is_empty() {
                break;
            }
            let can_accept = accepting && self.inflight.len() < self.config.max_inflight;

            tokio::select! {
                command = self.commands.recv(), if can_accept => match command {
                    Some(entry) => self.submit(entry).await,
                    None => {
                        debug!(
                            stream = %self.config.stream,
                            pending = self.inflight.len(),
                            "Command channel closed, draining in-flight batches"
                        );
                        accepting = false;
                    }
                },
                response = next_response(&mut self.connection), if !self.inflight.is_empty() => {
                    match response {
                        Some(response) => self.handle_response(response).await,
                        None => {
                            self.recover("append channel closed by the store".to_string())
                                .await
                        }
                    }
                }
            }
        }

        debug!(stream = %self.config.stream, "Stream driver finished");
    }

    /// Track `entry` and put it on the wire.
    async fn submit(&mut self, mut entry: InflightEntry) {
        if self.connection.is_none() {
            match self.config.transport.open_channel(&self.config.stream).await {
                Ok(channel) => self.connection = Some(Connection::new(channel)),
                Err(err) if err.is_transient() => {
                    entry.attempts = 1;
                    self.inflight.push(entry);
                    self.recover(err.to_string()).await;
                    return;
                }
                Err(err) => {
                    self.fail(entry, rejected(&err));
                    return;
                }
            }
        }

        entry.attempts = 1;
        entry.sent_at = std::time::Instant::now();
        debug!(
            stream = %self.config.stream,
            request_id = entry.request_id,
            rows = entry.row_count(),
            offset = ?entry.offset,
            "Sending append request"
        );

        let sent = match self.connection.as_mut() {
            Some(connection) => {
                connection
                    .send(&self.config.stream, &self.config.writer_schema, &entry)
                    .await
            }
            None => false,
        };
        entry.on_wire = sent;
        self.inflight.push(entry);
        self.emit_inflight();

        if !sent {
            self.recover("append channel closed while sending".to_string())
                .await;
        }
    }

    async fn handle_response(&mut self, response: AppendResponse) {
        let Some(pending) = self.inflight.get(response.request_id) else {
            debug!(
                stream = %self.config.stream,
                request_id = response.request_id,
                "Ignoring response for unknown request"
            );
            return;
        };
        let attempts = pending.attempts;

        match response.result {
            Err(status) if status.code.is_transient() => {
                warn!(
                    stream = %self.config.stream,
                    request_id = response.request_id,
                    attempt = attempts,
                    "Transient append failure: {}",
                    status.message
                );
                self.recover(status.message).await;
            }
            result => {
                let Some(entry) = self.inflight.take(response.request_id) else {
                    return;
                };
                match result {
                    Ok(offset) => self.complete(entry, offset),
                    Err(status) => self.settle_error(entry, status).await,
                }
                self.emit_inflight();
            }
        }
    }

    async fn settle_error(&mut self, entry: InflightEntry, status: StoreStatus) {
        match (status.code, entry.offset) {
            (StatusCode::AlreadyExists, Some(offset)) if entry.maybe_applied => {
                match self.applied_before_break(&entry).await {
                    Ok(()) => {
                        debug!(
                            stream = %self.config.stream,
                            request_id = entry.request_id,
                            offset,
                            "Resent batch was already applied"
                        );
                        self.complete(entry, offset);
                    }
                    Err(reason) => {
                        let err = AppendError::OffsetConflict {
                            offset,
                            message: format!("{}; {reason}", status.message),
                        };
                        self.fail(entry, err);
                    }
                }
            }
            (code, offset) if code.is_offset_conflict() => {
                let err = AppendError::OffsetConflict {
                    offset: offset.unwrap_or_default(),
                    message: status.message,
                };
                self.fail(entry, err);
            }
            _ => {
                let err = AppendError::Rejected {
                    message: status.to_string(),
                };
                self.fail(entry, err);
            }
        }
    }

    /// Check that the rows already at `entry`'s offsets can only be its own.
    async fn applied_before_break(&mut self, entry: &InflightEntry) -> Result<(), String> {
        let range = self.unclaimed_range(entry)?;

        let tail = self
            .config
            .transport
            .stream_tail(&self.config.stream)
            .await
            .map_err(|err| format!("cannot read stream tail: {err}"))?;
        if tail < range.end {
            return Err(format!("stream tail {tail} does not cover {range:?}"));
        }
        Ok(())
    }

    /// `entry`'s offsets, unless another batch holds or may hold any of them.
    fn unclaimed_range(&self, entry: &InflightEntry) -> Result<Range<i64>, String> {
        let range = entry
            .offset_range()
            .ok_or_else(|| "batch has no valid offset range".to_string())?;

        if self.claimed.overlaps(&range) {
            return Err(format!("offsets {range:?} are held by another batch"));
        }
        if let Some(other) = self.inflight.iter().find(|other| {
            other
                .offset_range()
                .is_some_and(|r| ranges_overlap(&r, &range))
        }) {
            return Err(format!(
                "offsets {range:?} overlap pending request {}",
                other.request_id
            ));
        }
        Ok(range)
    }

    /// Reconnect and resend every unresolved entry, or fail them all once
    /// the retry budget is spent.
    async fn recover(&mut self, mut message: String) {
        self.connection = None;

        loop {
            let Some(attempts) = self.inflight.front().map(|e| e.attempts) else {
                return;
            };
            if !self.config.retry.allows(attempts) {
                error!(
                    stream = %self.config.stream,
                    attempts,
                    pending = self.inflight.len(),
                    "Retry budget exhausted: {message}"
                );
                self.fail_all(AppendError::TransientTransport { attempts, message });
                return;
            }

            let delay = self.config.retry.backoff(attempts);
            warn!(
                stream = %self.config.stream,
                attempt = attempts + 1,
                pending = self.inflight.len(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting append stream"
            );
            tokio::time::sleep(delay).await;

            for entry in self.inflight.iter_mut() {
                entry.attempts += 1;
                if entry.on_wire {
                    entry.maybe_applied = true;
                    entry.on_wire = false;
                }
            }

            let channel = match self.config.transport.open_channel(&self.config.stream).await {
                Ok(channel) => channel,
                Err(err) if err.is_transient() => {
                    message = err.to_string();
                    continue;
                }
                Err(err) => {
                    self.fail_all(rejected(&err));
                    return;
                }
            };

            let mut connection = Connection::new(channel);
            let mut resent = 0u64;
            let mut intact = true;
            for entry in self.inflight.iter_mut() {
                if !connection
                    .send(&self.config.stream, &self.config.writer_schema, entry)
                    .await
                {
                    intact = false;
                    break;
                }
                entry.on_wire = true;
                resent += 1;
            }
            emit!(AppendRetried {
                batches: resent,
                target: self.config.target.clone(),
            });

            if intact {
                self.connection = Some(connection);
                return;
            }
            message = "append channel closed while resending".to_string();
        }
    }

    fn complete(&mut self, entry: InflightEntry, offset: i64) {
        let row_count = entry.row_count();
        if entry.offset.is_some()
            && let Some(range) = claimed_range(offset, row_count)
        {
            self.claimed.claim(range);
        }
        debug!(
            stream = %self.config.stream,
            request_id = entry.request_id,
            offset,
            rows = row_count,
            "Batch acknowledged"
        );
        emit!(BatchAppended {
            rows: row_count as u64,
            latency: entry.sent_at.elapsed(),
            target: self.config.target.clone(),
        });
        entry.resolve(Ok(AppendOutcome { offset, row_count }));
    }

    fn fail(&self, entry: InflightEntry, err: AppendError) {
        warn!(
            stream = %self.config.stream,
            request_id = entry.request_id,
            rows = entry.row_count(),
            "Batch failed: {err}"
        );
        emit!(BatchFailed {
            kind: err.kind(),
            target: self.config.target.clone(),
        });
        entry.resolve(Err(err));
    }

    fn fail_all(&mut self, err: AppendError) {
        let pending: Vec<_> = self.inflight.drain().collect();
        for entry in pending {
            // The store may hold these rows; keep later resends off them.
            if (entry.on_wire || entry.maybe_applied)
                && let Some(range) = entry.offset_range()
            {
                self.claimed.claim(range);
            }
            self.fail(entry, err.clone());
        }
        self.emit_inflight();
    }

    fn emit_inflight(&self) {
        emit!(InflightBatches {
            count: self.inflight.len(),
            target: self.config.target.clone(),
        });
    }
}

async fn next_response(connection: &mut Option<Connection>) -> Option<AppendResponse> {
    match connection {
        Some(connection) => connection.responses.recv().await,
        None => std::future::pending().await,
    }
}

fn claimed_range(offset: i64, row_count: usize) -> Option<Range<i64>> {
    let end = offset.checked_add(i64::try_from(row_count).ok()?)?;
    Some(offset..end)
}

fn rejected(err: &TransportError) -> AppendError {
    AppendError::Rejected {
        message: err.to_string(),
    }
}
