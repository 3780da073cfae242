//! Builds the pending work list and the optional sampling filters applied to it.

use crate::runtime::config::IngestConfig;
use crate::store::checkpoint::ProgressCheckpoint;
use crate::store::collection::RecordCollection;
use crate::store::record::WorkItem;

/// Items that are neither checkpointed nor already done in the record store,
/// in their original order.
///
/// Both sources are consulted: the record store catches completion markers
/// written by an earlier run whose checkpoint file was lost.
pub fn pending_items(
    items: &[WorkItem],
    checkpoint: &ProgressCheckpoint,
    records: &RecordCollection,
) -> Vec<WorkItem> {
    items
        .iter()
        .filter(|item| !checkpoint.is_completed(item.key()) && !records.is_done(item.key()))
        .cloned()
        .collect()
}

/// Caller-supplied narrowing of the pending list.
pub trait PendingFilter: Send + Sync {
    fn narrow(&self, pending: Vec<WorkItem>) -> Vec<WorkItem>;
}

/// Keeps the first `advanced` items whose label names an advanced auction
/// stage and the first `early` items that do not, preserving list order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSample {
    advanced: usize,
    early: usize,
    advanced_labels: Vec<String>,
}

impl StageSample {
    pub fn new<I, S>(advanced: usize, early: usize, advanced_labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            advanced,
            early,
            advanced_labels: advanced_labels
                .into_iter()
                .map(Into::into)
                .filter(|label: &String| !label.trim().is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(
            config.sample_advanced(),
            config.sample_early(),
            config.advanced_labels().iter().cloned(),
        )
    }

    fn is_advanced(&self, item: &WorkItem) -> bool {
        item.label()
            .map(|label| {
                self.advanced_labels
                    .iter()
                    .any(|advanced| label.contains(advanced.as_str()))
            })
            .unwrap_or(false)
    }
}

impl PendingFilter for StageSample {
    fn narrow(&self, pending: Vec<WorkItem>) -> Vec<WorkItem> {
        let mut advanced_taken = 0;
        let mut early_taken = 0;

        pending
            .into_iter()
            .filter(|item| {
                if self.is_advanced(item) {
                    advanced_taken += 1;
                    advanced_taken <= self.advanced
                } else {
                    early_taken += 1;
                    early_taken <= self.early
                }
            })
            .collect()
    }
}
