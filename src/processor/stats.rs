//! Run-level counters and the report handed back when a run ends.

use crate::fetch::metrics::FetchMetricsSnapshot;
use crate::fetch::outcome::OutcomeKind;
use crate::store::record::CaseKey;
use std::collections::BTreeMap;

const UNLABELED: &str = "(unlabeled)";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStatistics {
    pub succeeded: usize,
    pub no_data: usize,
    pub errors: usize,
    pub blocks: usize,
    pub per_label: BTreeMap<String, usize>,
    pub failed: Vec<CaseKey>,
}

impl RunStatistics {
    /// Counts one settled item. Blocked attempts are counted via [`Self::record_block`].
    pub fn record_settled(&mut self, kind: OutcomeKind, key: &CaseKey, label: Option<&str>) {
        match kind {
            OutcomeKind::Success => self.succeeded += 1,
            OutcomeKind::NoData => self.no_data += 1,
            OutcomeKind::Error => {
                self.errors += 1;
                self.failed.push(key.clone());
            }
            OutcomeKind::Blocked => {
                self.blocks += 1;
                return;
            }
        }

        let label = label
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .unwrap_or(UNLABELED);
        *self.per_label.entry(label.to_owned()).or_insert(0) += 1;
    }

    pub fn record_block(&mut self) {
        self.blocks += 1;
    }

    /// Items that reached a terminal state this run.
    pub fn settled(&self) -> usize {
        self.succeeded + self.no_data + self.errors
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Aborted {
        consecutive_blocks: u32,
        last_message: String,
    },
    Cancelled,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub statistics: RunStatistics,
    pub metrics: FetchMetricsSnapshot,
    pub total_items: usize,
    pub pending_items: usize,
    pub completed_items: usize,
}
