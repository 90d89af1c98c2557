//! Error types for floe.
//!
//! Errors are split by blast radius: schema and stream errors abort a run,
//! encode errors are scoped to one record, and append errors are scoped to
//! one batch and delivered through its handle.

use snafu::prelude::*;

pub use floe_core::error::ConfigError;

/// Errors reported by a [`WriteTransport`](crate::stream::WriteTransport) call.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    /// The named table or stream does not exist.
    #[snafu(display("Not found: {resource}"))]
    NotFound { resource: String },

    /// The store could not be reached or dropped the connection.
    #[snafu(display("Store unavailable: {message}"))]
    Unavailable { message: String },

    /// Credentials were rejected.
    #[snafu(display("Permission denied: {message}"))]
    PermissionDenied { message: String },

    /// The store refused the request as malformed.
    #[snafu(display("Invalid argument: {message}"))]
    InvalidArgument { message: String },

    /// The target is in a state that does not allow the request.
    #[snafu(display("Failed precondition: {message}"))]
    FailedPrecondition { message: String },
}

impl TransportError {
    /// Whether retrying the identical request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Unavailable { .. })
    }
}

/// Errors that can occur while resolving a table schema.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SchemaError {
    /// The table is missing or the store could not be reached.
    #[snafu(display("Schema for {table} unavailable: {source}"))]
    SchemaUnavailable {
        table: String,
        source: TransportError,
    },

    /// A remote column type has no encoder mapping.
    #[snafu(display("Unsupported type '{type_name}' for field '{path}'"))]
    UnsupportedType { path: String, type_name: String },

    /// A remote column mode is not REQUIRED, NULLABLE or REPEATED.
    #[snafu(display("Unsupported mode '{mode}' for field '{path}'"))]
    UnsupportedMode { path: String, mode: String },

    /// Two sibling fields share a name.
    #[snafu(display("Duplicate field '{path}'"))]
    DuplicateField { path: String },

    /// A STRUCT field declares no children.
    #[snafu(display("Struct field '{path}' has no children"))]
    EmptyStruct { path: String },

    /// The table declares no fields.
    #[snafu(display("Schema for {table} has no fields"))]
    EmptySchema { table: String },
}

/// Errors that can occur while encoding one record.
///
/// Paths are dotted from the record root, with `[i]` for array elements;
/// the record itself is `$`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EncodeError {
    /// A REQUIRED field is absent or null.
    #[snafu(display("Missing required field '{path}'"))]
    MissingField { path: String },

    /// The value's JSON type does not match the field type.
    #[snafu(display("Type mismatch at '{path}': expected {expected}, found {found}"))]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    /// The record carries a key the schema does not declare.
    #[snafu(display("Unknown field '{path}'"))]
    UnknownField { path: String },

    /// A BYTES value is not valid base64.
    #[snafu(display("Invalid base64 at '{path}': {source}"))]
    InvalidBase64 {
        path: String,
        source: base64::DecodeError,
    },

    /// A TIMESTAMP value is not an RFC 3339 timestamp.
    #[snafu(display("Invalid timestamp '{value}' at '{path}': {source}"))]
    InvalidTimestamp {
        path: String,
        value: String,
        source: chrono::ParseError,
    },
}

impl EncodeError {
    /// Short label for the failure class, used in metrics and reports.
    pub fn reason(&self) -> &'static str {
        match self {
            EncodeError::MissingField { .. } => "missing_field",
            EncodeError::UnknownField { .. } => "unknown_field",
            EncodeError::TypeMismatch { .. }
            | EncodeError::InvalidBase64 { .. }
            | EncodeError::InvalidTimestamp { .. } => "type_mismatch",
        }
    }
}

/// Errors that can occur while decoding a wire payload.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DecodeError {
    /// Malformed varint, key or length prefix.
    #[snafu(display("Malformed payload: {source}"))]
    Wire { source: prost::DecodeError },

    /// A length prefix runs past the end of the buffer.
    #[snafu(display("Truncated payload at '{path}'"))]
    Truncated { path: String },

    /// The payload carries a field number the schema does not declare.
    #[snafu(display("Unknown field number {number} in '{path}'"))]
    UnknownFieldNumber { path: String, number: u32 },

    /// The wire type does not match the declared field type.
    #[snafu(display("Unexpected wire type for '{path}'"))]
    WireTypeMismatch { path: String },

    /// A STRING field is not valid UTF-8.
    #[snafu(display("Invalid UTF-8 in '{path}'"))]
    InvalidUtf8 { path: String },

    /// A REQUIRED field is absent from the payload.
    #[snafu(display("Missing required field '{path}'"))]
    MissingRequired { path: String },

    /// A value cannot be represented in a JSON document.
    #[snafu(display("Unrepresentable value at '{path}'"))]
    Unrepresentable { path: String },
}

/// Outcome error for one appended batch.
///
/// Cloneable so the stream driver can hand it to a waiting handle.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum AppendError {
    /// The transport kept failing until the retry budget ran out.
    #[snafu(display("Transient transport failure after {attempts} attempt(s): {message}"))]
    TransientTransport { attempts: u32, message: String },

    /// The explicit offset does not match the stream tail. Never retried;
    /// reconcile the session before resubmitting.
    #[snafu(display("Offset conflict at offset {offset}: {message}"))]
    OffsetConflict { offset: i64, message: String },

    /// The session went away before the batch was acknowledged.
    #[snafu(display("Append session ended before the batch was acknowledged"))]
    Dropped,

    /// The store refused the batch for a non-retryable reason.
    #[snafu(display("Batch rejected: {message}"))]
    Rejected { message: String },
}

impl AppendError {
    /// Short label for the failure class, used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AppendError::TransientTransport { .. } => "transient_transport",
            AppendError::OffsetConflict { .. } => "offset_conflict",
            AppendError::Dropped => "dropped",
            AppendError::Rejected { .. } => "rejected",
        }
    }
}

/// Errors raised by an append session itself rather than by one batch.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StreamError {
    /// The store refused to create the stream.
    #[snafu(display("Failed to open append stream for {table}: {source}"))]
    CreateStream {
        table: String,
        source: TransportError,
    },

    /// The duplex channel could not be established.
    #[snafu(display("Failed to connect to stream {stream}: {source}"))]
    Connect {
        stream: String,
        source: TransportError,
    },

    /// Use after close.
    #[snafu(display("Append stream {stream} is closed"))]
    StreamClosed { stream: String },

    /// Explicit offsets were supplied on a store-assigned stream.
    #[snafu(display("Stream {stream} assigns offsets itself; batches must not carry one"))]
    OffsetNotSupported { stream: String },

    /// The batch is malformed before it ever reaches the store.
    #[snafu(display("Invalid batch for stream {stream}: {message}"))]
    InvalidBatch { stream: String, message: String },

    /// Querying the stream tail failed.
    #[snafu(display("Failed to reconcile stream {stream}: {source}"))]
    Reconcile {
        stream: String,
        source: TransportError,
    },

    /// Releasing the stream failed.
    #[snafu(display("Failed to finalize stream {stream}: {source}"))]
    Finalize {
        stream: String,
        source: TransportError,
    },

    /// The background driver task panicked or was cancelled.
    #[snafu(display("Stream driver for {stream} terminated abnormally: {source}"))]
    DriverJoin {
        stream: String,
        source: tokio::task::JoinError,
    },
}

/// Errors that can occur while writing the dead letter file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
// Prefix is intentional to avoid snafu selector conflicts (e.g., WriteSnafu)
#[allow(clippy::enum_variant_names)]
pub enum DlqError {
    /// Failed to serialize a failure record.
    #[snafu(display("Failed to serialize DLQ record: {source}"))]
    DlqSerialize { source: serde_json::Error },

    /// Failed to write the DLQ file.
    #[snafu(display("Failed to write DLQ file {path}: {source}"))]
    DlqWrite {
        path: String,
        source: std::io::Error,
    },
}

/// Top-level pipeline errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Schema resolution failed.
    #[snafu(display("Schema resolution failed: {source}"))]
    Schema { source: SchemaError },

    /// Session-level stream failure.
    #[snafu(display("Append stream failed: {source}"))]
    Stream { source: StreamError },

    /// Dead letter queue failure.
    #[snafu(display("Dead letter queue failed: {source}"))]
    Dlq { source: DlqError },

    /// Too many records failed.
    #[snafu(display("Max failures reached: {count} record(s) failed (limit {max})"))]
    MaxFailures { count: usize, max: usize },

    /// Failed to read the input file.
    #[snafu(display("Failed to read input {path}: {source}"))]
    ReadInput {
        path: String,
        source: std::io::Error,
    },

    /// The schema file is not a table schema document.
    #[snafu(display("Invalid schema file {path}: {source}"))]
    ParseSchema {
        path: String,
        source: serde_json::Error,
    },

    /// An input line is not a JSON document.
    #[snafu(display("Invalid JSON on input line {line}: {source}"))]
    ParseInput {
        line: usize,
        source: serde_json::Error,
    },
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<SchemaError> for PipelineError {
    fn from(source: SchemaError) -> Self {
        PipelineError::Schema { source }
    }
}

impl From<StreamError> for PipelineError {
    fn from(source: StreamError) -> Self {
        PipelineError::Stream { source }
    }
}

impl From<DlqError> for PipelineError {
    fn from(source: DlqError) -> Self {
        PipelineError::Dlq { source }
    }
}
