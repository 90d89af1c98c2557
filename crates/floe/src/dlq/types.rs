//! DLQ record and statistics types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use floe_core::metrics::events::FailureStage;

/// One record that was not delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRecord {
    /// Position of the record in the input sequence.
    pub index: usize,
    /// Failure class, e.g. `missing_field` or `offset_conflict`.
    pub reason: String,
    /// Error message describing the failure.
    pub error: String,
    /// Stage at which the failure occurred.
    pub stage: FailureStage,
    /// Timestamp when the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Failure counts by stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureStats {
    pub encode: usize,
    pub append: usize,
}

impl FailureStats {
    pub fn increment(&mut self, stage: FailureStage) {
        match stage {
            FailureStage::Encode => self.encode += 1,
            FailureStage::Append => self.append += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.encode + self.append
    }
}
