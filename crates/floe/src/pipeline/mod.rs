//! End-to-end delivery of one record sequence into one table.
//!
//! Resolve the schema, encode every record independently, append the valid
//! ones in order in batches of `stream.batch_size`, and account for every
//! record in the [`RunReport`]. Invalid records are reported and skipped; they
//! never hold back the rest of their batch.

mod report;

pub use report::RunReport;

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info};

use floe_core::emit;
use floe_core::metrics::events::{FailureStage, RecordsEncoded};

use crate::config::Config;
use crate::dlq::{DeadLetterQueue, FailureTracker};
use crate::encode::{EncodedRecord, Encoder};
use crate::error::PipelineError;
use crate::schema::{SchemaResolver, TableSchema};
use crate::stream::{AppendBatch, AppendSession, WriteTransportRef};
use crate::tracker::AppendHandle;

/// A configured writer for one destination table.
pub struct Pipeline {
    config: Config,
    transport: WriteTransportRef,
    resolver: Arc<SchemaResolver>,
}

impl Pipeline {
    pub fn new(config: Config, transport: WriteTransportRef) -> Self {
        let resolver = Arc::new(SchemaResolver::new(Arc::clone(&transport)));
        Self::with_resolver(config, transport, resolver)
    }

    /// Share a resolver (and its schema cache) across pipelines.
    pub fn with_resolver(
        config: Config,
        transport: WriteTransportRef,
        resolver: Arc<SchemaResolver>,
    ) -> Self {
        Self {
            config,
            transport,
            resolver,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Deliver `records` and report the fate of each one.
    ///
    /// Schema and session failures abort the run. The append session is
    /// closed on every path once it has been opened.
    pub async fn run(&self, records: &[Value]) -> Result<RunReport, PipelineError> {
        let table = &self.config.table;
        let schema = self.resolver.resolve(table).await?;

        let dlq = DeadLetterQueue::from_config(&self.config.error_handling)
            .await?
            .map(Arc::new);
        let mut failures =
            FailureTracker::new(self.config.error_handling.max_failures, dlq, table.label());

        let result = self.deliver(&schema, records, &mut failures).await;
        failures.finalize_dlq().await;
        let mut report = result?;

        report.failed = failures.count();
        report.failures = failures.into_failures();
        info!(
            table = %table,
            records = report.records,
            appended = report.appended,
            failed = report.failed,
            batches = report.batches,
            "Run complete"
        );
        Ok(report)
    }

    async fn deliver(
        &self,
        schema: &Arc<TableSchema>,
        records: &[Value],
        failures: &mut FailureTracker,
    ) -> Result<RunReport, PipelineError> {
        let mut report = RunReport {
            records: records.len(),
            ..Default::default()
        };

        let encoder = Encoder::new(self.config.encoding);
        let mut encoded = Vec::with_capacity(records.len());
        for (index, result) in encoder.encode_all(schema, records).into_iter().enumerate() {
            match result {
                Ok(record) => encoded.push(record),
                Err(err) => {
                    failures
                        .record_failure(index, err.reason(), &err.to_string(), FailureStage::Encode)
                        .await?
                }
            }
        }
        emit!(RecordsEncoded {
            count: encoded.len() as u64,
            target: self.config.table.label(),
        });
        if encoded.is_empty() {
            info!(table = %self.config.table, "No valid records to append");
            return Ok(report);
        }

        let mut session = AppendSession::open(
            Arc::clone(&self.transport),
            Arc::clone(schema),
            self.config.stream.session_options(),
        )
        .await?;

        let appended = self
            .append_all(&mut session, encoded, failures, &mut report)
            .await;
        let closed = session.close().await;
        appended?;
        closed?;

        Ok(report)
    }

    async fn append_all(
        &self,
        session: &mut AppendSession,
        encoded: Vec<EncodedRecord>,
        failures: &mut FailureTracker,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let mut pending: Vec<(Vec<usize>, AppendHandle)> = Vec::new();
        for chunk in encoded.chunks(self.config.stream.batch_size) {
            let batch = AppendBatch::new(chunk.to_vec());
            let indices = batch.record_indices();
            let handle = session.append(batch).await?;
            debug!(
                request_id = handle.request_id(),
                rows = handle.row_count(),
                "Submitted batch"
            );
            pending.push((indices, handle));
        }

        // Handles resolve in acknowledgement order; results are consumed in
        // submission order.
        let results = join_all(
            pending
                .into_iter()
                .map(|(indices, handle)| async move { (indices, handle.wait().await) }),
        )
        .await;

        for (indices, result) in results {
            match result {
                Ok(outcome) => report.record_batch(&outcome),
                Err(err) => {
                    let message = err.to_string();
                    for index in indices {
                        failures
                            .record_failure(index, err.kind(), &message, FailureStage::Append)
                            .await?;
                    }
                }
            }
        }

        Ok(())
    }
}
