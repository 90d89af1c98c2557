//! In-process store implementing [`WriteTransport`].
//!
//! Behaves like the remote store as far as the writer can observe: requests
//! on a connection are applied strictly in order, explicit offsets must equal
//! the stream tail, rows are decoded against the table schema and a batch is
//! applied all-or-nothing. Faults and acknowledgement delays can be queued to
//! exercise the retry and correlation paths.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::StreamMode;
use super::transport::{
    AppendChannel, AppendRequest, AppendResponse, StatusCode, StoreStatus, StreamName,
    WriteTransport,
};
use crate::encode::decode;
use crate::error::TransportError;
use crate::schema::{RemoteTableSchema, TableSchema};
use crate::table::TableRef;

const CHANNEL_CAPACITY: usize = 256;

/// A failure applied to the next append request the store receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Break the connection before applying the request.
    Reject,
    /// Apply the request, then break the connection instead of acknowledging.
    LoseAck,
}

struct TableState {
    remote: RemoteTableSchema,
    schema: Option<Arc<TableSchema>>,
    rows: Vec<Value>,
}

struct StreamState {
    table: TableRef,
    mode: StreamMode,
    rows: Vec<Value>,
    finalized: bool,
}

#[derive(Default)]
struct State {
    tables: HashMap<TableRef, TableState>,
    streams: HashMap<StreamName, StreamState>,
    faults: VecDeque<Fault>,
    ack_delays: VecDeque<Duration>,
    failed_connects: usize,
    fetch_delay: Duration,
    schema_fetches: usize,
    connections_opened: usize,
    requests_received: usize,
}

/// What the connection task does after applying one request.
struct Applied {
    response: AppendResponse,
    delay: Option<Duration>,
    broken: bool,
}

/// Shared, cloneable in-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace `table` with the given schema and no rows.
    pub fn register_table(&self, table: TableRef, remote: RemoteTableSchema) {
        let schema = TableSchema::from_remote(table.clone(), &remote)
            .ok()
            .map(Arc::new);
        self.lock().tables.insert(
            table,
            TableState {
                remote,
                schema,
                rows: Vec::new(),
            },
        );
    }

    /// Queue a fault for the next append request.
    pub fn inject_fault(&self, fault: Fault) {
        self.lock().faults.push_back(fault);
    }

    /// Delay the acknowledgement of the next append request by `delay`.
    pub fn delay_ack(&self, delay: Duration) {
        self.lock().ack_delays.push_back(delay);
    }

    /// Fail the next `count` channel opens with `Unavailable`.
    pub fn fail_next_connects(&self, count: usize) {
        self.lock().failed_connects += count;
    }

    /// Delay every schema fetch by `delay`.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.lock().fetch_delay = delay;
    }

    /// Rows committed to `table`, in offset order across its streams.
    pub fn rows(&self, table: &TableRef) -> Vec<Value> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Rows of one stream in offset order.
    pub fn stream_rows(&self, stream: &StreamName) -> Vec<Value> {
        self.lock()
            .streams
            .get(stream)
            .map(|s| s.rows.clone())
            .unwrap_or_default()
    }

    pub fn is_finalized(&self, stream: &StreamName) -> bool {
        self.lock().streams.get(stream).is_some_and(|s| s.finalized)
    }

    pub fn schema_fetches(&self) -> usize {
        self.lock().schema_fetches
    }

    pub fn connections_opened(&self) -> usize {
        self.lock().connections_opened
    }

    pub fn requests_received(&self) -> usize {
        self.lock().requests_received
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply one request against the stream state.
    fn apply(&self, stream: &StreamName, request: &AppendRequest, schema_seen: &mut bool) -> Applied {
        let mut state = self.lock();
        state.requests_received += 1;
        let fault = state.faults.pop_front();
        let delay = state.ack_delays.pop_front();

        let result = apply_request(&mut state, stream, request, schema_seen, fault);
        let broken = matches!(&result, Err(status) if status.code == StatusCode::Unavailable);

        Applied {
            response: AppendResponse {
                request_id: request.request_id,
                result,
            },
            delay,
            broken,
        }
    }

    async fn serve(
        self,
        stream: StreamName,
        mut requests: mpsc::Receiver<AppendRequest>,
        responses: mpsc::Sender<AppendResponse>,
    ) {
        let mut schema_seen = false;

        while let Some(request) = requests.recv().await {
            let Applied {
                response,
                delay,
                broken,
            } = self.apply(&stream, &request, &mut schema_seen);

            match delay {
                Some(delay) if !delay.is_zero() => {
                    let responses = responses.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = responses.send(response).await;
                    });
                }
                _ => {
                    if responses.send(response).await.is_err() {
                        break;
                    }
                }
            }

            if broken {
                debug!(stream = %stream, "Dropping broken connection");
                break;
            }
        }
    }
}

fn apply_request(
    state: &mut State,
    stream: &StreamName,
    request: &AppendRequest,
    schema_seen: &mut bool,
    fault: Option<Fault>,
) -> Result<i64, StoreStatus> {
    let State {
        tables, streams, ..
    } = state;

    let target = streams
        .get_mut(stream)
        .ok_or_else(|| StoreStatus::new(StatusCode::NotFound, format!("stream {stream}")))?;
    if target.finalized {
        return Err(StoreStatus::new(
            StatusCode::FailedPrecondition,
            format!("stream {stream} is finalized"),
        ));
    }
    let table = tables.get_mut(&target.table).ok_or_else(|| {
        StoreStatus::new(StatusCode::NotFound, format!("table {}", target.table))
    })?;
    let schema = table.schema.as_ref().ok_or_else(|| {
        StoreStatus::new(StatusCode::FailedPrecondition, "table schema is not writable")
    })?;

    match &request.writer_schema {
        Some(writer_schema) if writer_schema != schema.handshake().bytes() => {
            return Err(StoreStatus::new(
                StatusCode::InvalidArgument,
                "writer schema does not match the table schema",
            ));
        }
        Some(_) => *schema_seen = true,
        None if !*schema_seen => {
            return Err(StoreStatus::new(
                StatusCode::InvalidArgument,
                "first request on a connection must carry the writer schema",
            ));
        }
        None => {}
    }

    if fault == Some(Fault::Reject) {
        return Err(StoreStatus::new(StatusCode::Unavailable, "connection reset"));
    }

    let tail = target.rows.len() as i64;
    match (target.mode, request.offset) {
        (StreamMode::Default, Some(_)) => {
            return Err(StoreStatus::new(
                StatusCode::InvalidArgument,
                "the default stream does not accept offsets",
            ));
        }
        (StreamMode::CommittedExplicit, Some(offset)) if offset < tail => {
            return Err(StoreStatus::new(
                StatusCode::AlreadyExists,
                format!("offset {offset} is below the stream tail {tail}"),
            ));
        }
        (StreamMode::CommittedExplicit, Some(offset)) if offset > tail => {
            return Err(StoreStatus::new(
                StatusCode::OutOfRange,
                format!("offset {offset} is beyond the stream tail {tail}"),
            ));
        }
        _ => {}
    }

    let mut decoded = Vec::with_capacity(request.rows.len());
    for (i, row) in request.rows.iter().enumerate() {
        let value = decode(schema.root(), row).map_err(|err| {
            StoreStatus::new(StatusCode::InvalidArgument, format!("row {i}: {err}"))
        })?;
        decoded.push(value);
    }

    table.rows.extend(decoded.iter().cloned());
    target.rows.extend(decoded);

    if fault == Some(Fault::LoseAck) {
        return Err(StoreStatus::new(StatusCode::Unavailable, "acknowledgement lost"));
    }
    Ok(tail)
}

#[async_trait]
impl WriteTransport for MemoryStore {
    async fn fetch_schema(&self, table: &TableRef) -> Result<RemoteTableSchema, TransportError> {
        let delay = {
            let mut state = self.lock();
            state.schema_fetches += 1;
            state.fetch_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.lock()
            .tables
            .get(table)
            .map(|t| t.remote.clone())
            .ok_or_else(|| TransportError::NotFound {
                resource: table.path(),
            })
    }

    async fn create_stream(
        &self,
        table: &TableRef,
        mode: StreamMode,
    ) -> Result<StreamName, TransportError> {
        let mut state = self.lock();
        if !state.tables.contains_key(table) {
            return Err(TransportError::NotFound {
                resource: table.path(),
            });
        }

        let name = match mode {
            StreamMode::Default => StreamName::default_for(table),
            StreamMode::CommittedExplicit => StreamName::new(format!(
                "{}/streams/{}",
                table.path(),
                Uuid::new_v4().simple()
            )),
        };
        state
            .streams
            .entry(name.clone())
            .or_insert_with(|| StreamState {
                table: table.clone(),
                mode,
                rows: Vec::new(),
                finalized: false,
            });

        Ok(name)
    }

    async fn open_channel(&self, stream: &StreamName) -> Result<AppendChannel, TransportError> {
        {
            let mut state = self.lock();
            if state.failed_connects > 0 {
                state.failed_connects -= 1;
                return Err(TransportError::Unavailable {
                    message: "connection refused".to_string(),
                });
            }
            match state.streams.get(stream) {
                None => {
                    return Err(TransportError::NotFound {
                        resource: stream.to_string(),
                    });
                }
                Some(s) if s.finalized => {
                    return Err(TransportError::FailedPrecondition {
                        message: format!("stream {stream} is finalized"),
                    });
                }
                Some(_) => {}
            }
            state.connections_opened += 1;
        }

        let (request_tx, request_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (response_tx, response_rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(self.clone().serve(stream.clone(), request_rx, response_tx));

        Ok(AppendChannel {
            requests: request_tx,
            responses: response_rx,
        })
    }

    async fn stream_tail(&self, stream: &StreamName) -> Result<i64, TransportError> {
        self.lock()
            .streams
            .get(stream)
            .map(|s| s.rows.len() as i64)
            .ok_or_else(|| TransportError::NotFound {
                resource: stream.to_string(),
            })
    }

    async fn finalize_stream(&self, stream: &StreamName) -> Result<i64, TransportError> {
        let mut state = self.lock();
        let target = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| TransportError::NotFound {
                resource: stream.to_string(),
            })?;
        if target.mode == StreamMode::Default {
            return Err(TransportError::FailedPrecondition {
                message: "the default stream cannot be finalized".to_string(),
            });
        }
        target.finalized = true;
        Ok(target.rows.len() as i64)
    }
}
