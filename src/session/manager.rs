//! The session boundary: one authenticated context shared by every fetch of a
//! run, plus the reqwest-backed implementation used in production.

use crate::processor::backoff::{retry_with_backoff, RetryBackoff, RetryDisposition};
use crate::runtime::config::IngestConfig;
use crate::session::auth::build_default_headers;
use crate::session::options::SessionOptions;
use anyhow::{bail, Result};
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Session establishment or refresh failed. Fatal to the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    Client { reason: String },
    Unreachable { url: String, reason: String },
    Rejected { url: String, status: u16 },
    Cancelled { url: String },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Client { reason } => {
                write!(f, "failed to build session client: {reason}")
            }
            SessionError::Unreachable { url, reason } => {
                write!(f, "session endpoint {url} unreachable: {reason}")
            }
            SessionError::Rejected { url, status } => {
                write!(f, "session endpoint {url} rejected warm-up with status {status}")
            }
            SessionError::Cancelled { url } => {
                write!(f, "session warm-up against {url} cancelled")
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Establishes and re-establishes the single session used by all fetches.
///
/// `refresh_session` takes `&mut self`, so no fetch can run against a handle
/// while the session is being replaced.
pub trait SessionManager: Send {
    type Handle: Clone + Send + Sync + 'static;

    /// Returns the live session, establishing one if needed.
    fn ensure_session(&mut self) -> BoxFuture<'_, Result<Self::Handle, SessionError>>;

    /// Discards the current session and authenticates from scratch.
    fn refresh_session(&mut self) -> BoxFuture<'_, Result<Self::Handle, SessionError>>;
}

/// A warmed-up HTTP client with its own cookie jar.
#[derive(Debug, Clone)]
pub struct HttpSession {
    client: reqwest::Client,
    generation: u64,
    established_at: Instant,
}

impl HttpSession {
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Increments every time a session is established.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn age(&self) -> Duration {
        self.established_at.elapsed()
    }
}

#[derive(Debug)]
pub struct HttpSessionManager {
    session_url: String,
    options: SessionOptions,
    current: Option<HttpSession>,
    generation: u64,
    cancellation: Option<CancellationToken>,
}

impl HttpSessionManager {
    pub fn new(session_url: impl Into<String>, options: SessionOptions) -> Result<Self> {
        options.validate()?;
        let session_url = session_url.into().trim().to_owned();
        if !(session_url.starts_with("http://") || session_url.starts_with("https://")) {
            bail!("session_url must start with http:// or https://");
        }

        Ok(Self {
            session_url,
            options,
            current: None,
            generation: 0,
            cancellation: None,
        })
    }

    /// Stops warm-up retries (and their backoff sleeps) once `token` fires.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        Self::new(config.session_url(), config.session_options())
    }

    pub fn current(&self) -> Option<&HttpSession> {
        self.current.as_ref()
    }

    async fn connect(&self) -> Result<reqwest::Client, SessionError> {
        let headers = build_default_headers(&self.options).map_err(|err| SessionError::Client {
            reason: format!("{err:#}"),
        })?;
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .timeout(self.options.request_timeout)
            .build()
            .map_err(|err| SessionError::Client {
                reason: err.to_string(),
            })?;

        let response = client
            .get(&self.session_url)
            .send()
            .await
            .map_err(|err| SessionError::Unreachable {
                url: self.session_url.clone(),
                reason: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Rejected {
                url: self.session_url.clone(),
                status: status.as_u16(),
            });
        }

        Ok(client)
    }

    async fn establish(&mut self) -> Result<HttpSession, SessionError> {
        self.current = None;

        let mut policy = RetryBackoff::new(
            self.options.establish_backoff,
            self.options.establish_backoff.saturating_mul(4),
        )
        .with_max_attempts(self.options.establish_attempts);
        if let Some(token) = self.cancellation.as_ref() {
            policy = policy.with_cancellation(token);
        }
        let cancelled = || {
            self.cancellation
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
        };
        let url = self.session_url.as_str();
        let this = &*self;

        let client = retry_with_backoff(
            policy,
            move |_| async move { this.connect().await.map_err(anyhow::Error::from) },
            |attempt, backoff, err, will_retry| {
                if will_retry {
                    tracing::warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        url,
                        "session warm-up failed; retrying"
                    );
                } else {
                    tracing::error!(attempt, error = %err, url, "session warm-up exhausted retries");
                }
            },
            |_, err| match err.downcast_ref::<SessionError>() {
                Some(SessionError::Client { .. }) => RetryDisposition::Abort,
                _ => RetryDisposition::Retry,
            },
        )
        .await
        .map_err(|err| match err.downcast::<SessionError>() {
            Ok(session_err) => session_err,
            Err(_) if cancelled() => SessionError::Cancelled {
                url: self.session_url.clone(),
            },
            Err(other) => SessionError::Client {
                reason: format!("{other:#}"),
            },
        })?;

        self.generation += 1;
        let session = HttpSession {
            client,
            generation: self.generation,
            established_at: Instant::now(),
        };
        tracing::info!(
            generation = session.generation,
            url = %self.session_url,
            "session established"
        );
        self.current = Some(session.clone());
        Ok(session)
    }
}

impl SessionManager for HttpSessionManager {
    type Handle = HttpSession;

    fn ensure_session(&mut self) -> BoxFuture<'_, Result<HttpSession, SessionError>> {
        Box::pin(async move {
            if let Some(session) = &self.current {
                if session.age() < self.options.max_age {
                    return Ok(session.clone());
                }
                tracing::info!(
                    generation = session.generation,
                    age_secs = session.age().as_secs(),
                    "session exceeded max age; re-establishing"
                );
            }
            self.establish().await
        })
    }

    fn refresh_session(&mut self) -> BoxFuture<'_, Result<HttpSession, SessionError>> {
        Box::pin(async move {
            if let Some(previous) = self.current.take() {
                tracing::info!(generation = previous.generation, "discarding session");
            }
            self.establish().await
        })
    }
}
