//! Sequential ingestion loop.
//!
//! `Orchestrator` owns every collaborator of a run: the session manager, the
//! item fetcher, the classifier, both stores, and the optional pending filter.
//! Items are processed strictly one at a time; every pause is a cancellable
//! sleep and every exit path goes through a final flush of the record store
//! followed by the checkpoint.

use super::backoff::{
    retry_with_backoff, sleep_with_cancellation, BackoffController, BackoffDecision, RetryBackoff,
    RetryDisposition,
};
use super::selection::{pending_items, PendingFilter};
use super::stats::{RunOutcome, RunReport, RunStatistics};
use crate::fetch::classifier::ResultClassifier;
use crate::fetch::fetcher::ItemFetcher;
use crate::fetch::metrics::FetchMetrics;
use crate::fetch::outcome::{FetchOutcome, RawOutcome};
use crate::runtime::config::IngestConfig;
use crate::runtime::error::IngestError;
use crate::runtime::hooks::{NoopObserver, RunObserver};
use crate::runtime::telemetry::report_summary;
use crate::session::manager::SessionManager;
use crate::store::checkpoint::{CheckpointStore, ProgressCheckpoint};
use crate::store::collection::{RecordCollection, RecordStore};
use crate::store::record::{CaseKey, WorkItem};
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One write attempt plus one immediate retry.
const PERSIST_ATTEMPTS: usize = 2;

/// Result of a single diagnostic fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    pub item: WorkItem,
    pub raw: RawOutcome,
    pub outcome: FetchOutcome,
}

pub struct Orchestrator<S, F>
where
    S: SessionManager,
    F: ItemFetcher<S::Handle>,
{
    config: IngestConfig,
    session: S,
    fetcher: F,
    classifier: ResultClassifier,
    records: Box<dyn RecordStore>,
    checkpoints: Box<dyn CheckpointStore>,
    filter: Option<Box<dyn PendingFilter>>,
    observer: Box<dyn RunObserver>,
    metrics: FetchMetrics,
    shutdown: CancellationToken,
}

/// Mutable state of one pass over the pending list.
struct LoopState<'a> {
    pending: &'a [WorkItem],
    records: &'a mut RecordCollection,
    checkpoint: &'a mut ProgressCheckpoint,
    statistics: &'a mut RunStatistics,
}

impl<S, F> Orchestrator<S, F>
where
    S: SessionManager,
    F: ItemFetcher<S::Handle>,
{
    pub fn new(
        config: IngestConfig,
        session: S,
        fetcher: F,
        records: impl RecordStore + 'static,
        checkpoints: impl CheckpointStore + 'static,
    ) -> Self {
        let classifier = ResultClassifier::new(config.no_data_status());
        Self {
            config,
            session,
            fetcher,
            classifier,
            records: Box::new(records),
            checkpoints: Box::new(checkpoints),
            filter: None,
            observer: Box::new(NoopObserver),
            metrics: FetchMetrics::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: ResultClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_filter(mut self, filter: impl PendingFilter + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn with_observer(mut self, observer: impl RunObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// Replaces the root token; cancelling it makes the loop flush and return `Cancelled`.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Loads both stores, processes every pending item and always attempts a
    /// final flush before returning.
    ///
    /// An `Err` means the run stopped on a session or persistence failure;
    /// block-threshold aborts and cancellations are reported through
    /// [`RunOutcome`].
    pub async fn run(&mut self) -> Result<RunReport> {
        let mut records = self
            .records
            .load_all()
            .context("failed to load record store")?;
        let items = records.work_items();

        let mut checkpoint = self
            .checkpoints
            .load(items.len())
            .context("failed to load checkpoint")?;
        checkpoint.set_total(items.len());

        let mut pending = pending_items(&items, &checkpoint, &records);
        let unfiltered = pending.len();
        if let Some(filter) = &self.filter {
            pending = filter.narrow(pending);
        }

        tracing::info!(
            total = items.len(),
            completed = checkpoint.completed_len(),
            pending = pending.len(),
            filtered_out = unfiltered.saturating_sub(pending.len()),
            "starting ingestion run"
        );
        self.observer.run_started(pending.len(), items.len());

        let mut statistics = RunStatistics::default();
        let loop_result = self
            .drive(LoopState {
                pending: &pending,
                records: &mut records,
                checkpoint: &mut checkpoint,
                statistics: &mut statistics,
            })
            .await;

        let flush_result = self.flush(&records, &mut checkpoint).await;

        let outcome = match (loop_result, flush_result) {
            (Ok(outcome), Ok(())) => outcome,
            (Ok(_), Err(err)) => return Err(err.into()),
            (Err(err), flush) => {
                if let Err(flush_err) = flush {
                    tracing::error!(error = %flush_err, "final flush failed after run error");
                }
                tracing::error!(error = %err, "ingestion run failed");
                return Err(err.into());
            }
        };

        let report = RunReport {
            outcome,
            statistics,
            metrics: self.metrics.snapshot(),
            total_items: items.len(),
            pending_items: pending.len(),
            completed_items: checkpoint.completed_len(),
        };

        report_summary(&report);
        self.observer.run_finished(&report);
        Ok(report)
    }

    /// Fetches one item once and classifies it without touching either store.
    pub async fn diagnose(&mut self, key: &CaseKey) -> Result<Diagnosis> {
        let records = self
            .records
            .load_all()
            .context("failed to load record store")?;
        let item = records
            .work_item(key)
            .unwrap_or_else(|| WorkItem::new(key.clone()));

        let session = self
            .session
            .ensure_session()
            .await
            .map_err(IngestError::from)?;
        let raw = self.fetcher.fetch(&session, &item).await;
        let outcome = self.classifier.classify(&raw);

        tracing::info!(
            key = %key,
            status = ?raw.status(),
            outcome = %outcome.kind(),
            "diagnostic fetch finished"
        );

        Ok(Diagnosis { item, raw, outcome })
    }

    async fn drive(&mut self, state: LoopState<'_>) -> Result<RunOutcome, IngestError> {
        let LoopState {
            pending,
            records,
            checkpoint,
            statistics,
        } = state;

        let shutdown = self.shutdown.clone();
        let batch_interval = self.config.batch_interval();
        let flush_every = if self.config.sample_mode() {
            1
        } else {
            self.config.flush_every()
        };

        let mut backoff = BackoffController::new(
            self.config.max_consecutive_blocks(),
            self.config.block_cooldown(),
        );
        let mut index = 0;
        let mut unflushed = 0;
        let mut rested_at = None;

        while let Some(item) = pending.get(index) {
            if index > 0 && index % batch_interval == 0 && rested_at != Some(index) {
                rested_at = Some(index);
                tracing::info!(
                    index,
                    rest_ms = self.config.batch_rest().as_millis() as u64,
                    "batch boundary reached; resting"
                );
                if !self.pause(self.config.batch_rest()).await {
                    return Ok(self.cancelled(index));
                }
            }

            if shutdown.is_cancelled() {
                return Ok(self.cancelled(index));
            }

            let session = tokio::select! {
                _ = shutdown.cancelled() => return Ok(self.cancelled(index)),
                result = self.session.ensure_session() => result?,
            };

            let started = Instant::now();
            let raw = tokio::select! {
                _ = shutdown.cancelled() => return Ok(self.cancelled(index)),
                raw = self.fetcher.fetch(&session, item) => raw,
            };
            let outcome = self.classifier.classify(&raw);
            self.record_metrics(&raw, &outcome, started.elapsed());

            match backoff.observe(&outcome) {
                BackoffDecision::Proceed => {}
                BackoffDecision::Abort { consecutive_blocks } => {
                    statistics.record_block();
                    let message = outcome_message(&outcome).to_owned();
                    let err = IngestError::Blocked {
                        consecutive_blocks,
                        message: message.clone(),
                    };
                    tracing::error!(key = %item.key(), error = %err, "block threshold reached; aborting run");
                    return Ok(RunOutcome::Aborted {
                        consecutive_blocks,
                        last_message: message,
                    });
                }
                BackoffDecision::Cooldown(wait) => {
                    statistics.record_block();
                    let consecutive_blocks = backoff.consecutive_blocks();
                    tracing::warn!(
                        key = %item.key(),
                        consecutive_blocks,
                        cooldown_secs = wait.as_secs(),
                        message = outcome_message(&outcome),
                        "upstream blocked request; cooling down"
                    );
                    self.observer.cooling_down(item, consecutive_blocks, wait);

                    if !self.pause(wait).await {
                        return Ok(self.cancelled(index));
                    }

                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(self.cancelled(index)),
                        result = self.session.refresh_session() => { result?; }
                    }
                    tracing::info!(key = %item.key(), "session refreshed; retrying item");
                    continue;
                }
            }

            let kind = outcome.kind();
            if let FetchOutcome::Error { status, message } = &outcome {
                let err = IngestError::ItemFetch {
                    key: item.key().clone(),
                    status: *status,
                    message: message.clone(),
                };
                tracing::warn!(error = %err, "item settled with error");
            }

            match records.get_mut(item.key()) {
                Some(entry) => {
                    entry.apply_outcome(outcome);
                }
                None => tracing::warn!(key = %item.key(), "no record entry to merge into"),
            }
            checkpoint.mark_completed(item.key().clone());
            statistics.record_settled(kind, item.key(), item.label());
            self.observer.item_settled(index, item, kind);
            tracing::debug!(key = %item.key(), outcome = %kind, index, "item settled");

            index += 1;
            unflushed += 1;
            if unflushed >= flush_every {
                self.flush(records, checkpoint).await?;
                unflushed = 0;
            }

            if index < pending.len() && !self.pause(self.config.inter_request_delay()).await {
                return Ok(self.cancelled(index));
            }
        }

        Ok(RunOutcome::Completed)
    }

    /// Writes the record store and then the checkpoint, each with one
    /// immediate retry.
    async fn flush(
        &self,
        records: &RecordCollection,
        checkpoint: &mut ProgressCheckpoint,
    ) -> Result<(), IngestError> {
        checkpoint.touch();
        persist("record store", || self.records.save_all(records)).await?;
        persist("checkpoint", || self.checkpoints.save(checkpoint)).await?;
        tracing::debug!(
            completed = checkpoint.completed_len(),
            total = checkpoint.total(),
            "progress flushed"
        );
        Ok(())
    }

    /// Sleeps unless cancelled; returns `false` when the run must stop.
    async fn pause(&self, delay: Duration) -> bool {
        sleep_with_cancellation(delay, Some(&self.shutdown))
            .await
            .is_ok()
    }

    fn cancelled(&self, index: usize) -> RunOutcome {
        tracing::info!(index, "stop requested; ending run after final flush");
        RunOutcome::Cancelled
    }

    fn record_metrics(&self, raw: &RawOutcome, outcome: &FetchOutcome, latency: Duration) {
        match outcome {
            FetchOutcome::Success(_) | FetchOutcome::NoData { .. } => {
                self.metrics.record_success(latency)
            }
            FetchOutcome::Blocked { .. } => self.metrics.record_block(latency),
            FetchOutcome::Error { .. } if raw.is_timeout() => self.metrics.record_timeout(latency),
            FetchOutcome::Error { .. } => self.metrics.record_failure(latency),
        }
    }
}

async fn persist<W>(store: &'static str, mut write: W) -> Result<(), IngestError>
where
    W: FnMut() -> Result<()>,
{
    retry_with_backoff(
        RetryBackoff::immediate(PERSIST_ATTEMPTS),
        |_| std::future::ready(write()),
        |attempt, _, err, will_retry| {
            tracing::warn!(store, attempt, will_retry, error = %err, "persist attempt failed");
        },
        |_, _| RetryDisposition::Retry,
    )
    .await
    .map_err(|source| IngestError::Persistence {
        target: store,
        source,
    })
}

fn outcome_message(outcome: &FetchOutcome) -> &str {
    match outcome {
        FetchOutcome::Success(_) => "",
        FetchOutcome::NoData { message }
        | FetchOutcome::Blocked { message }
        | FetchOutcome::Error { message, .. } => message,
    }
}
