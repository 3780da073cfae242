use crate::fetch::outcome::FetchOutcome;
use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// What the orchestrator must do after an outcome was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    /// Settle the item and move on.
    Proceed,
    /// Wait, refresh the session, then retry the same item.
    Cooldown(Duration),
    /// Flush everything and stop the run with a failure status.
    Abort { consecutive_blocks: u32 },
}

/// Tracks consecutive upstream blocks for one run. Never persisted: a resumed
/// run starts from zero.
#[derive(Debug, Clone)]
pub struct BackoffController {
    consecutive_blocks: u32,
    max_consecutive_blocks: u32,
    cooldown: Duration,
}

impl BackoffController {
    pub fn new(max_consecutive_blocks: u32, cooldown: Duration) -> Self {
        Self {
            consecutive_blocks: 0,
            max_consecutive_blocks: max_consecutive_blocks.max(1),
            cooldown,
        }
    }

    pub fn consecutive_blocks(&self) -> u32 {
        self.consecutive_blocks
    }

    pub fn observe(&mut self, outcome: &FetchOutcome) -> BackoffDecision {
        match outcome {
            FetchOutcome::Success(_) | FetchOutcome::NoData { .. } => {
                self.consecutive_blocks = 0;
                BackoffDecision::Proceed
            }
            FetchOutcome::Error { .. } => BackoffDecision::Proceed,
            FetchOutcome::Blocked { .. } => {
                self.consecutive_blocks = self.consecutive_blocks.saturating_add(1);
                if self.consecutive_blocks >= self.max_consecutive_blocks {
                    BackoffDecision::Abort {
                        consecutive_blocks: self.consecutive_blocks,
                    }
                } else {
                    BackoffDecision::Cooldown(self.cooldown)
                }
            }
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) struct RetryBackoff<'a> {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<usize>,
    pub cancellation: Option<&'a CancellationToken>,
}

impl<'a> RetryBackoff<'a> {
    pub(crate) fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts: None,
            cancellation: None,
        }
    }

    /// Zero-delay policy used for persistence writes: one immediate retry.
    pub(crate) fn immediate(max_attempts: usize) -> Self {
        Self::new(Duration::ZERO, Duration::ZERO).with_max_attempts(max_attempts)
    }

    pub(crate) fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub(crate) fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

pub(crate) enum RetryDisposition {
    Retry,
    Abort,
}

pub(crate) async fn retry_with_backoff<'a, T, F, Fut, L, C>(
    config: RetryBackoff<'a>,
    mut operation: F,
    mut on_retry: L,
    mut classify_error: C,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    L: FnMut(usize, Duration, &anyhow::Error, bool),
    C: FnMut(usize, &anyhow::Error) -> RetryDisposition,
{
    let mut attempt = 0;
    let mut backoff = config.initial_delay;

    loop {
        attempt += 1;

        if let Some(token) = config.cancellation {
            if token.is_cancelled() {
                return Err(anyhow!("retry cancelled"));
            }
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => match classify_error(attempt, &err) {
                RetryDisposition::Abort => return Err(err),
                RetryDisposition::Retry => {
                    let exhausted = config
                        .max_attempts
                        .map(|max| attempt >= max)
                        .unwrap_or(false);

                    on_retry(attempt, backoff, &err, !exhausted);

                    if exhausted {
                        return Err(err);
                    }

                    sleep_with_cancellation(backoff, config.cancellation).await?;
                    backoff = next_backoff(backoff, config.max_delay);
                }
            },
        }
    }
}

/// Sleeps for `delay`, returning early with an error when `cancellation` fires.
pub(crate) async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return match cancellation {
            Some(token) if token.is_cancelled() => Err(anyhow!("sleep cancelled")),
            _ => Ok(()),
        };
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => Err(anyhow!("sleep cancelled")),
            _ = sleep(delay) => Ok(()),
        }
    } else {
        sleep(delay).await;
        Ok(())
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
