//! Dead Letter Queue writer.
//!
//! Buffers failed records and appends them as NDJSON to a local file. Each
//! run writes a new file with a timestamp suffix.

use chrono::Utc;
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::ErrorHandlingConfig;
use crate::error::{DlqError, DlqSerializeSnafu, DlqWriteSnafu};

use super::types::{FailedRecord, FailureStats};

const BUFFER_SIZE: usize = 100;

/// Dead Letter Queue for records that were not delivered.
pub struct DeadLetterQueue {
    path: PathBuf,
    buffer: Mutex<Vec<FailedRecord>>,
    stats: Mutex<FailureStats>,
}

impl DeadLetterQueue {
    /// Create a DLQ from configuration.
    ///
    /// Returns `None` if no DLQ path is configured.
    pub async fn from_config(config: &ErrorHandlingConfig) -> Result<Option<Self>, DlqError> {
        let Some(dir) = &config.dlq_path else {
            return Ok(None);
        };

        tokio::fs::create_dir_all(dir)
            .await
            .context(DlqWriteSnafu { path: dir.as_str() })?;

        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let path = Path::new(dir).join(format!("failures-{timestamp}.ndjson"));
        info!("DLQ enabled: {}", path.display());

        Ok(Some(Self::new(path)))
    }

    /// Create a DLQ writing to exactly `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer: Mutex::new(Vec::new()),
            stats: Mutex::new(FailureStats::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffer a failed record, flushing when the buffer is full.
    pub async fn record_failure(&self, record: FailedRecord) {
        debug!(
            "Recording DLQ failure: record {} at stage {}",
            record.index,
            record.stage.as_str()
        );

        self.stats.lock().await.increment(record.stage);

        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(record);
            buffer.len() >= BUFFER_SIZE
        };

        if should_flush && let Err(e) = self.flush().await {
            error!("Failed to flush DLQ: {}", e);
        }
    }

    /// Append buffered records to the file.
    pub async fn flush(&self) -> Result<(), DlqError> {
        let records = {
            let mut buffer = self.buffer.lock().await;
            if buffer.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *buffer)
        };

        let count = records.len();
        let mut ndjson = String::new();
        for record in &records {
            let line = serde_json::to_string(record).context(DlqSerializeSnafu)?;
            ndjson.push_str(&line);
            ndjson.push('\n');
        }

        let path = self.path.display().to_string();
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .context(DlqWriteSnafu { path: path.as_str() })?;
        file.write_all(ndjson.as_bytes())
            .await
            .context(DlqWriteSnafu { path: path.as_str() })?;
        file.flush()
            .await
            .context(DlqWriteSnafu { path: path.as_str() })?;

        debug!("Flushed {} records to DLQ", count);
        Ok(())
    }

    /// Flush remaining records and log totals.
    pub async fn finalize(&self) -> Result<(), DlqError> {
        self.flush().await?;
        let stats = *self.stats.lock().await;
        info!(
            "DLQ finalized: {} total failures (encode={}, append={})",
            stats.total(),
            stats.encode,
            stats.append
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use floe_core::metrics::events::FailureStage;

    fn failed(index: usize, stage: FailureStage) -> FailedRecord {
        FailedRecord {
            index,
            reason: "type_mismatch".to_string(),
            error: format!("record {index} is broken"),
            stage,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_disabled_without_path() {
        let dlq = DeadLetterQueue::from_config(&ErrorHandlingConfig::default())
            .await
            .unwrap();
        assert!(dlq.is_none());
    }

    #[tokio::test]
    async fn test_finalize_writes_ndjson() {
        let dir = tempfile::tempdir().unwrap();
        let config = ErrorHandlingConfig {
            max_failures: 0,
            dlq_path: Some(dir.path().join("dlq").display().to_string()),
        };
        let dlq = DeadLetterQueue::from_config(&config).await.unwrap().unwrap();

        dlq.record_failure(failed(1, FailureStage::Encode)).await;
        dlq.record_failure(failed(4, FailureStage::Append)).await;
        dlq.finalize().await.unwrap();

        let contents = std::fs::read_to_string(dlq.path()).unwrap();
        let records: Vec<FailedRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].index, 1);
        assert_eq!(records[1].stage, FailureStage::Append);
    }

    #[tokio::test]
    async fn test_flush_appends_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = DeadLetterQueue::new(dir.path().join("failures.ndjson"));

        dlq.record_failure(failed(0, FailureStage::Encode)).await;
        dlq.flush().await.unwrap();
        dlq.record_failure(failed(1, FailureStage::Encode)).await;
        dlq.flush().await.unwrap();

        let contents = std::fs::read_to_string(dlq.path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
