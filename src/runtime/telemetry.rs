use crate::processor::stats::{RunOutcome, RunReport};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Logs the end-of-run summary: settled counts, per-label totals and fetch metrics.
pub fn report_summary(report: &RunReport) {
    let stats = &report.statistics;
    let metrics = &report.metrics;

    match &report.outcome {
        RunOutcome::Completed => tracing::info!(
            target: "docketsync::summary",
            succeeded = stats.succeeded,
            no_data = stats.no_data,
            errors = stats.errors,
            blocks = stats.blocks,
            completed = report.completed_items,
            total = report.total_items,
            "ingestion run completed"
        ),
        RunOutcome::Cancelled => tracing::warn!(
            target: "docketsync::summary",
            succeeded = stats.succeeded,
            no_data = stats.no_data,
            errors = stats.errors,
            blocks = stats.blocks,
            completed = report.completed_items,
            total = report.total_items,
            "ingestion run stopped before completion"
        ),
        RunOutcome::Aborted {
            consecutive_blocks,
            last_message,
        } => tracing::error!(
            target: "docketsync::summary",
            succeeded = stats.succeeded,
            no_data = stats.no_data,
            errors = stats.errors,
            blocks = stats.blocks,
            consecutive_blocks,
            last_message = %last_message,
            completed = report.completed_items,
            total = report.total_items,
            "ingestion run aborted after repeated blocks"
        ),
    }

    for (label, count) in &stats.per_label {
        tracing::info!(target: "docketsync::summary", label = %label, count, "items settled per label");
    }

    if !stats.failed.is_empty() {
        let failed: Vec<String> = stats.failed.iter().map(ToString::to_string).collect();
        tracing::warn!(
            target: "docketsync::summary",
            count = failed.len(),
            keys = %failed.join(", "),
            "items settled with errors"
        );
    }

    tracing::info!(
        target: "docketsync::metrics",
        requests = metrics.total_requests,
        errors = metrics.total_errors,
        timeouts = metrics.total_timeouts,
        blocks = metrics.total_blocks,
        error_rate = format!("{:.2}", metrics.error_rate),
        avg_latency_ms = format!("{:.1}", metrics.average_latency_ms),
        "fetch metrics snapshot"
    );
}
