//! Summary of one pipeline run.

use serde::Serialize;

use crate::dlq::FailedRecord;
use crate::tracker::AppendOutcome;

/// What happened to every input record of a run.
///
/// `appended + failed == records` once the run completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    /// Input records seen.
    pub records: usize,
    /// Records acknowledged by the store.
    pub appended: usize,
    /// Records that were reported instead of delivered.
    pub failed: usize,
    /// Batches acknowledged by the store.
    pub batches: usize,
    /// Lowest offset assigned in this run.
    pub first_offset: Option<i64>,
    /// Highest offset assigned in this run.
    pub last_offset: Option<i64>,
    /// Undelivered records in the order they were reported.
    pub failures: Vec<FailedRecord>,
}

impl RunReport {
    pub(crate) fn record_batch(&mut self, outcome: &AppendOutcome) {
        self.appended += outcome.row_count;
        self.batches += 1;
        self.first_offset = Some(
            self.first_offset
                .map_or(outcome.offset, |first| first.min(outcome.offset)),
        );
        let last = outcome.last_offset();
        self.last_offset = Some(self.last_offset.map_or(last, |prev| prev.max(last)));
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.appended == self.records
    }
}
