//! Internal events for floe metrics emission.
//!
//! Every event carries a `target` label naming the destination table so
//! multi-table processes can be observed per table.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when a table schema is fetched and converted.
pub struct SchemaResolved {
    pub fields: usize,
    pub target: String,
}

impl InternalEvent for SchemaResolved {
    fn emit(self) {
        trace!(fields = self.fields, target = %self.target, "Schema resolved");
        counter!("floe_schema_resolutions_total", "target" => self.target).increment(1);
    }
}

/// Event emitted when records are encoded into wire payloads.
pub struct RecordsEncoded {
    pub count: u64,
    pub target: String,
}

impl InternalEvent for RecordsEncoded {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Records encoded");
        counter!("floe_records_encoded_total", "target" => self.target).increment(self.count);
    }
}

/// Stage at which a record failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Encode,
    Append,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Encode => "encode",
            FailureStage::Append => "append",
        }
    }
}

/// Event emitted when a record cannot be delivered.
pub struct RecordsFailed {
    pub count: u64,
    pub stage: FailureStage,
    pub target: String,
}

impl InternalEvent for RecordsFailed {
    fn emit(self) {
        trace!(count = self.count, stage = self.stage.as_str(), target = %self.target, "Records failed");
        counter!(
            "floe_records_failed_total",
            "stage" => self.stage.as_str(),
            "target" => self.target
        )
        .increment(self.count);
    }
}

/// Event emitted when a batch is acknowledged by the store.
pub struct BatchAppended {
    pub rows: u64,
    pub latency: Duration,
    pub target: String,
}

impl InternalEvent for BatchAppended {
    fn emit(self) {
        trace!(rows = self.rows, target = %self.target, "Batch appended");
        counter!("floe_batches_appended_total", "target" => self.target.clone()).increment(1);
        counter!("floe_rows_appended_total", "target" => self.target.clone()).increment(self.rows);
        histogram!("floe_append_latency_seconds", "target" => self.target)
            .record(self.latency.as_secs_f64());
    }
}

/// Event emitted when a batch resolves to an error.
pub struct BatchFailed {
    pub kind: &'static str,
    pub target: String,
}

impl InternalEvent for BatchFailed {
    fn emit(self) {
        trace!(kind = self.kind, target = %self.target, "Batch failed");
        counter!("floe_batches_failed_total", "kind" => self.kind, "target" => self.target)
            .increment(1);
    }
}

/// Event emitted when in-flight batches are resent after a transport failure.
pub struct AppendRetried {
    pub batches: u64,
    pub target: String,
}

impl InternalEvent for AppendRetried {
    fn emit(self) {
        trace!(batches = self.batches, target = %self.target, "Append retried");
        counter!("floe_append_retries_total", "target" => self.target).increment(self.batches);
    }
}

/// Gauge of batches sent but not yet acknowledged.
pub struct InflightBatches {
    pub count: usize,
    pub target: String,
}

impl InternalEvent for InflightBatches {
    fn emit(self) {
        gauge!("floe_inflight_batches", "target" => self.target).set(self.count as f64);
    }
}
