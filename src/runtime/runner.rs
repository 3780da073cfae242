use crate::fetch::fetcher::ItemFetcher;
use crate::processor::orchestrator::Orchestrator;
use crate::processor::stats::{RunOutcome, RunReport};
use crate::session::manager::SessionManager;
use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Process exit status used when the run was stopped by Ctrl-C.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Drives one orchestrator run and turns OS signals into a graceful stop.
pub struct Runner<S, F>
where
    S: SessionManager,
    F: ItemFetcher<S::Handle>,
{
    orchestrator: Orchestrator<S, F>,
}

impl<S, F> Runner<S, F>
where
    S: SessionManager,
    F: ItemFetcher<S::Handle>,
{
    pub fn new(orchestrator: Orchestrator<S, F>) -> Self {
        Self { orchestrator }
    }

    /// Returns the root shutdown token so callers can wire their own stop signals.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.orchestrator.cancellation_token()
    }

    pub fn orchestrator_mut(&mut self) -> &mut Orchestrator<S, F> {
        &mut self.orchestrator
    }

    /// Runs until the pending list is exhausted, the run aborts, or a Ctrl-C
    /// (SIGINT) arrives. A signal cancels the root token; the orchestrator
    /// then performs its final flush before this returns.
    pub async fn run_until_ctrl_c(&mut self) -> Result<RunReport> {
        let shutdown = self.orchestrator.cancellation_token();
        let signal_task = tokio::spawn(async move {
            tokio::select! {
                result = signal::ctrl_c() => match result {
                    Ok(()) => {
                        tracing::info!("Ctrl-C received; stopping after the current item");
                        shutdown.cancel();
                    }
                    Err(err) => tracing::warn!(error = %err, "failed to listen for Ctrl-C"),
                },
                _ = shutdown.cancelled() => {}
            }
        });

        let result = self.orchestrator.run().await;
        signal_task.abort();
        result
    }
}

/// Maps the result of a run onto a process exit status.
pub fn exit_status(result: &Result<RunReport>) -> u8 {
    match result {
        Ok(report) => match report.outcome {
            RunOutcome::Completed => 0,
            RunOutcome::Cancelled => EXIT_INTERRUPTED,
            RunOutcome::Aborted { .. } => 1,
        },
        Err(_) => 1,
    }
}
