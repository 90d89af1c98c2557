//! Per-record failure reporting.
//!
//! Every record that does not reach the table (an encode failure, or a row of
//! a batch that failed to append) is recorded here. Failures are counted by
//! stage, kept for the run report and optionally written as NDJSON to a local
//! directory for later inspection and replay.

mod queue;
mod tracker;
mod types;

pub use queue::DeadLetterQueue;
pub use tracker::FailureTracker;
pub use types::{FailedRecord, FailureStats};
