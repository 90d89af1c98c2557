//! Failure accounting with DLQ integration.
//!
//! Records every undelivered record, emits metrics, forwards to the DLQ when
//! one is configured and enforces `max_failures`.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, warn};

use floe_core::emit;
use floe_core::metrics::events::{FailureStage, RecordsFailed};

use crate::error::{MaxFailuresSnafu, PipelineError};

use super::{DeadLetterQueue, FailedRecord, FailureStats};

/// Tracks per-record failures for one run.
pub struct FailureTracker {
    failures: Vec<FailedRecord>,
    stats: FailureStats,
    max_failures: usize,
    dlq: Option<Arc<DeadLetterQueue>>,
    /// Table label for metrics.
    target: String,
}

impl FailureTracker {
    /// Create a new failure tracker.
    ///
    /// # Arguments
    /// * `max_failures` - Maximum failures before stopping (0 = unlimited)
    /// * `dlq` - Optional DLQ for recording failures
    /// * `target` - Table label for metrics
    pub fn new(max_failures: usize, dlq: Option<Arc<DeadLetterQueue>>, target: String) -> Self {
        Self {
            failures: Vec::new(),
            stats: FailureStats::default(),
            max_failures,
            dlq,
            target,
        }
    }

    /// Record that the record at `index` was not delivered.
    ///
    /// Returns `Err` once `max_failures` is reached, after flushing the DLQ.
    pub async fn record_failure(
        &mut self,
        index: usize,
        reason: &str,
        error: &str,
        stage: FailureStage,
    ) -> Result<(), PipelineError> {
        warn!(
            table = %self.target,
            record = index,
            stage = stage.as_str(),
            reason,
            "Record failed: {error}"
        );
        emit!(RecordsFailed {
            count: 1,
            stage,
            target: self.target.clone(),
        });

        let failed = FailedRecord {
            index,
            reason: reason.to_string(),
            error: error.to_string(),
            stage,
            timestamp: Utc::now(),
        };
        if let Some(dlq) = &self.dlq {
            dlq.record_failure(failed.clone()).await;
        }
        self.failures.push(failed);
        self.stats.increment(stage);

        let count = self.stats.total();
        if self.max_failures > 0 && count >= self.max_failures {
            error!("Max failures ({}) reached, stopping run", count);
            self.finalize_dlq().await;
            return MaxFailuresSnafu {
                count,
                max: self.max_failures,
            }
            .fail();
        }

        Ok(())
    }

    /// Finalize DLQ, logging any errors.
    pub async fn finalize_dlq(&self) {
        if let Some(dlq) = &self.dlq
            && let Err(e) = dlq.finalize().await
        {
            error!("Failed to finalize DLQ: {}", e);
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn count(&self) -> usize {
        self.failures.len()
    }

    pub fn stats(&self) -> FailureStats {
        self.stats
    }

    /// Failures in the order they were recorded.
    pub fn failures(&self) -> &[FailedRecord] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<FailedRecord> {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unlimited_failures() {
        let mut tracker = FailureTracker::new(0, None, "p.d.t".to_string());
        for index in 0..10 {
            tracker
                .record_failure(index, "missing_field", "boom", FailureStage::Encode)
                .await
                .unwrap();
        }
        assert_eq!(tracker.count(), 10);
        assert_eq!(tracker.stats().encode, 10);
    }

    #[tokio::test]
    async fn test_max_failures_stops_run() {
        let mut tracker = FailureTracker::new(2, None, "p.d.t".to_string());
        tracker
            .record_failure(0, "type_mismatch", "bad", FailureStage::Encode)
            .await
            .unwrap();
        let err = tracker
            .record_failure(5, "rejected", "bad", FailureStage::Append)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::MaxFailures { count: 2, max: 2 }));
        assert_eq!(tracker.failures()[1].index, 5);
        assert_eq!(tracker.stats().append, 1);
    }

    #[tokio::test]
    async fn test_failures_reach_dlq() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = Arc::new(DeadLetterQueue::new(dir.path().join("f.ndjson")));
        let mut tracker = FailureTracker::new(0, Some(Arc::clone(&dlq)), "p.d.t".to_string());

        tracker
            .record_failure(3, "unknown_field", "extra key", FailureStage::Encode)
            .await
            .unwrap();
        tracker.finalize_dlq().await;

        let contents = std::fs::read_to_string(dlq.path()).unwrap();
        assert!(contents.contains(r#""reason":"unknown_field""#));
    }
}
