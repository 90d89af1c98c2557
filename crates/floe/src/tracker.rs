//! Correlates append acknowledgements with the batches that produced them.
//!
//! Each submitted batch gets an [`AppendHandle`] backed by a oneshot channel.
//! The stream driver keeps the sending halves in an [`InflightQueue`] ordered
//! by submission, looks entries up by request id when a response arrives, and
//! resolves them in whatever order the store acknowledges.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::AppendError;

/// Where an acknowledged batch landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Offset of the first row; row `i` of the batch sits at `offset + i`.
    pub offset: i64,
    pub row_count: usize,
}

impl AppendOutcome {
    /// Offset of the last row of the batch.
    pub fn last_offset(&self) -> i64 {
        self.end_offset().saturating_sub(1)
    }

    /// Offsets occupied by the batch, in row order.
    pub fn offsets(&self) -> Range<i64> {
        self.offset..self.end_offset()
    }

    fn end_offset(&self) -> i64 {
        let rows = i64::try_from(self.row_count).unwrap_or(i64::MAX);
        self.offset.saturating_add(rows)
    }
}

pub type AppendResult = Result<AppendOutcome, AppendError>;

/// Pending result of one appended batch.
#[derive(Debug)]
pub struct AppendHandle {
    request_id: u64,
    row_count: usize,
    offset: Option<i64>,
    rx: oneshot::Receiver<AppendResult>,
}

impl AppendHandle {
    pub(crate) fn new(
        request_id: u64,
        row_count: usize,
        offset: Option<i64>,
        rx: oneshot::Receiver<AppendResult>,
    ) -> Self {
        Self {
            request_id,
            row_count,
            offset,
            rx,
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// The explicit offset the batch was submitted with, if any.
    pub fn requested_offset(&self) -> Option<i64> {
        self.offset
    }

    /// Wait until the store acknowledges the batch or it fails for good.
    pub async fn wait(self) -> AppendResult {
        self.rx.await.unwrap_or(Err(AppendError::Dropped))
    }
}

/// A batch that has been handed to the driver and not yet resolved.
#[derive(Debug)]
pub(crate) struct InflightEntry {
    pub request_id: u64,
    pub rows: Arc<[Bytes]>,
    pub offset: Option<i64>,
    /// Sends so far, including the first.
    pub attempts: u32,
    pub sent_at: Instant,
    /// Written to the current connection and not yet answered on it.
    pub on_wire: bool,
    /// An earlier connection carried the request and broke before answering,
    /// so the store may hold its rows already.
    pub maybe_applied: bool,
    reply: oneshot::Sender<AppendResult>,
}

impl InflightEntry {
    pub fn new(
        request_id: u64,
        rows: Arc<[Bytes]>,
        offset: Option<i64>,
        reply: oneshot::Sender<AppendResult>,
    ) -> Self {
        Self {
            request_id,
            rows,
            offset,
            attempts: 0,
            sent_at: Instant::now(),
            on_wire: false,
            maybe_applied: false,
            reply,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Offsets the batch would occupy, when it was pinned to one.
    pub fn offset_range(&self) -> Option<Range<i64>> {
        let start = self.offset?;
        let end = start.checked_add(i64::try_from(self.row_count()).ok()?)?;
        Some(start..end)
    }

    /// Deliver the final result. A dropped handle is not an error.
    pub fn resolve(self, result: AppendResult) {
        let _ = self.reply.send(result);
    }
}

/// Unresolved entries in submission order.
#[derive(Debug, Default)]
pub(crate) struct InflightQueue {
    entries: VecDeque<InflightEntry>,
}

impl InflightQueue {
    pub fn push(&mut self, entry: InflightEntry) {
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn front(&self) -> Option<&InflightEntry> {
        self.entries.front()
    }

    pub fn get(&self, request_id: u64) -> Option<&InflightEntry> {
        self.entries.iter().find(|e| e.request_id == request_id)
    }

    /// Remove the entry for `request_id`, wherever it sits in the queue.
    pub fn take(&mut self, request_id: u64) -> Option<InflightEntry> {
        let position = self
            .entries
            .iter()
            .position(|e| e.request_id == request_id)?;
        self.entries.remove(position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InflightEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut InflightEntry> {
        self.entries.iter_mut()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = InflightEntry> + '_ {
        self.entries.drain(..)
    }
}

/// Offset ranges whose rows belong to batches other than the one being
/// settled: acknowledged batches and batches that failed in an unknown state.
///
/// Adjacent ranges are merged, so a stream written front to back keeps a
/// single entry.
#[derive(Debug, Default)]
pub(crate) struct ClaimedOffsets {
    // start -> end (exclusive)
    ranges: BTreeMap<i64, i64>,
}

impl ClaimedOffsets {
    pub fn claim(&mut self, range: Range<i64>) {
        if range.is_empty() {
            return;
        }
        let mut start = range.start;
        let mut end = range.end;

        let touching: Vec<i64> = self
            .ranges
            .range(..=end)
            .filter(|&(_, &e)| e >= start)
            .map(|(&s, _)| s)
            .collect();
        for key in touching {
            if let Some(e) = self.ranges.remove(&key) {
                start = start.min(key);
                end = end.max(e);
            }
        }
        self.ranges.insert(start, end);
    }

    pub fn overlaps(&self, range: &Range<i64>) -> bool {
        !range.is_empty()
            && self
                .ranges
                .range(..range.end)
                .next_back()
                .is_some_and(|(_, &end)| end > range.start)
    }
}

pub(crate) fn ranges_overlap(a: &Range<i64>, b: &Range<i64>) -> bool {
    a.start < b.end && b.start < a.end
}
