//! floe: schema-driven record encoding and ordered append-stream delivery.
//!
//! This crate handles:
//! - Resolving a remote table schema into a field tree and a stream handshake
//! - Encoding untyped JSON records into the table's protobuf wire format
//! - Appending encoded batches over a pipelined, offset-aware stream with retries
//! - Correlating acknowledgements with batches and reporting every undelivered record

pub mod cli;
pub mod config;
pub mod dlq;
pub mod encode;
pub mod error;
pub mod pipeline;
pub mod schema;
pub mod stream;
pub mod table;
pub mod tracker;

// Re-export commonly used items
pub use cli::CliArgs;
pub use config::Config;
pub use encode::{EncodeOptions, EncodedRecord, Encoder, decode};
pub use error::PipelineError;
pub use pipeline::{Pipeline, RunReport};
pub use schema::{SchemaResolver, TableSchema};
pub use stream::{AppendBatch, AppendSession, MemoryStore, SessionOptions, StreamMode};
pub use table::TableRef;
pub use tracker::{AppendHandle, AppendOutcome, AppendResult};

// Re-export from floe-core
pub use floe_core::{RetryPolicy, init_tracing};
