use crate::fetch::outcome::OutcomeKind;
use crate::processor::stats::RunReport;
use crate::store::record::WorkItem;
use std::time::Duration;

/// Progress callbacks invoked by the orchestrator. Every method defaults to a no-op.
pub trait RunObserver: Send {
    fn run_started(&mut self, _pending: usize, _total: usize) {}

    fn item_settled(&mut self, _index: usize, _item: &WorkItem, _kind: OutcomeKind) {}

    fn cooling_down(&mut self, _item: &WorkItem, _consecutive_blocks: u32, _wait: Duration) {}

    fn run_finished(&mut self, _report: &RunReport) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}
