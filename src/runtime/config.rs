use crate::fetch::classifier::DEFAULT_NO_DATA_STATUS;
use crate::session::options::{BasicCredentials, SessionOptions, DEFAULT_USER_AGENT};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SESSION_MAX_AGE_SECS: u64 = 30 * 60;
const DEFAULT_INTER_REQUEST_DELAY_MS: u64 = 1_500;
const DEFAULT_BATCH_INTERVAL: usize = 50;
const DEFAULT_BATCH_REST_SECS: u64 = 15;
const DEFAULT_FLUSH_EVERY: usize = 10;
const DEFAULT_BLOCK_COOLDOWN_SECS: u64 = 180;
const DEFAULT_MAX_CONSECUTIVE_BLOCKS: u32 = 5;
const DEFAULT_SAMPLE_ADVANCED: usize = 5;
const DEFAULT_SAMPLE_EARLY: usize = 5;

/// Runtime configuration for an ingestion run.
///
/// All instances must be constructed via [`IngestConfig::builder`] or [`IngestConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    session_url: String,
    fetch_url: String,
    records_path: PathBuf,
    checkpoint_path: PathBuf,
    request_timeout: Duration,
    session_max_age: Duration,
    user_agent: String,
    credentials: Option<BasicCredentials>,
    inter_request_delay: Duration,
    batch_interval: usize,
    batch_rest: Duration,
    flush_every: usize,
    block_cooldown: Duration,
    max_consecutive_blocks: u32,
    no_data_status: u16,
    resume: bool,
    sample_mode: bool,
    sample_advanced: usize,
    sample_early: usize,
    advanced_labels: Vec<String>,
}

pub struct IngestConfigParams {
    pub session_url: String,
    pub fetch_url: String,
    pub records_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub request_timeout: Duration,
    pub session_max_age: Duration,
    pub user_agent: String,
    pub credentials: Option<BasicCredentials>,
    pub inter_request_delay: Duration,
    pub batch_interval: usize,
    pub batch_rest: Duration,
    pub flush_every: usize,
    pub block_cooldown: Duration,
    pub max_consecutive_blocks: u32,
    pub no_data_status: u16,
    pub resume: bool,
    pub sample_mode: bool,
    pub sample_advanced: usize,
    pub sample_early: usize,
    pub advanced_labels: Vec<String>,
}

impl IngestConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`IngestConfig::builder`] when most values use defaults.
    pub fn new(params: IngestConfigParams) -> Result<Self> {
        let IngestConfigParams {
            session_url,
            fetch_url,
            records_path,
            checkpoint_path,
            request_timeout,
            session_max_age,
            user_agent,
            credentials,
            inter_request_delay,
            batch_interval,
            batch_rest,
            flush_every,
            block_cooldown,
            max_consecutive_blocks,
            no_data_status,
            resume,
            sample_mode,
            sample_advanced,
            sample_early,
            advanced_labels,
        } = params;

        let config = Self {
            session_url: trimmed_string(session_url),
            fetch_url: trimmed_string(fetch_url),
            records_path,
            checkpoint_path,
            request_timeout,
            session_max_age,
            user_agent: trimmed_string(user_agent),
            credentials,
            inter_request_delay,
            batch_interval,
            batch_rest,
            flush_every,
            block_cooldown,
            max_consecutive_blocks,
            no_data_status,
            resume,
            sample_mode,
            sample_advanced,
            sample_early,
            advanced_labels: advanced_labels
                .into_iter()
                .map(trimmed_string)
                .filter(|label| !label.is_empty())
                .collect(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Page visited to obtain a fresh session (cookies).
    pub fn session_url(&self) -> &str {
        &self.session_url
    }

    /// Endpoint that returns the delivery/document history of one case.
    pub fn fetch_url(&self) -> &str {
        &self.fetch_url
    }

    pub fn records_path(&self) -> &Path {
        &self.records_path
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    /// Per-request timeout; a request exceeding it settles as an error.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Age after which `ensure_session` re-establishes the session.
    pub fn session_max_age(&self) -> Duration {
        self.session_max_age
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn credentials(&self) -> Option<&BasicCredentials> {
        self.credentials.as_ref()
    }

    /// Pause between consecutive items.
    pub fn inter_request_delay(&self) -> Duration {
        self.inter_request_delay
    }

    /// A batch rest happens before every `batch_interval`-th item.
    pub fn batch_interval(&self) -> usize {
        self.batch_interval
    }

    pub fn batch_rest(&self) -> Duration {
        self.batch_rest
    }

    /// Number of settled items between flushes (ignored in sample mode, which
    /// flushes after every item).
    pub fn flush_every(&self) -> usize {
        self.flush_every
    }

    pub fn block_cooldown(&self) -> Duration {
        self.block_cooldown
    }

    pub fn max_consecutive_blocks(&self) -> u32 {
        self.max_consecutive_blocks
    }

    pub fn no_data_status(&self) -> u16 {
        self.no_data_status
    }

    pub fn resume(&self) -> bool {
        self.resume
    }

    pub fn sample_mode(&self) -> bool {
        self.sample_mode
    }

    pub fn sample_advanced(&self) -> usize {
        self.sample_advanced
    }

    pub fn sample_early(&self) -> usize {
        self.sample_early
    }

    /// Label fragments marking an item as an advanced auction stage.
    pub fn advanced_labels(&self) -> &[String] {
        &self.advanced_labels
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            request_timeout: self.request_timeout,
            max_age: self.session_max_age,
            user_agent: self.user_agent.clone(),
            credentials: self.credentials.clone(),
            ..SessionOptions::default()
        }
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.session_url, "session_url")?;
        validate_url(&self.fetch_url, "fetch_url")?;
        ensure_path(&self.records_path, "records_path")?;
        ensure_path(&self.checkpoint_path, "checkpoint_path")?;

        if self.records_path == self.checkpoint_path {
            bail!("records_path and checkpoint_path must differ");
        }

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.session_max_age.is_zero() {
            bail!("session_max_age must be greater than 0");
        }

        if self.user_agent.is_empty() {
            bail!("user_agent cannot be empty");
        }

        if self.batch_interval == 0 {
            bail!("batch_interval must be greater than 0");
        }

        if self.flush_every == 0 {
            bail!("flush_every must be greater than 0");
        }

        if self.max_consecutive_blocks == 0 {
            bail!("max_consecutive_blocks must be greater than 0");
        }

        if !(100..=599).contains(&self.no_data_status) {
            bail!(
                "no_data_status ({}) must be a valid HTTP status code",
                self.no_data_status
            );
        }

        if self.sample_mode && self.sample_advanced == 0 && self.sample_early == 0 {
            bail!("sample mode needs sample_advanced or sample_early greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct IngestConfigBuilder {
    session_url: Option<String>,
    fetch_url: Option<String>,
    records_path: Option<PathBuf>,
    checkpoint_path: Option<PathBuf>,
    request_timeout: Option<Duration>,
    session_max_age: Option<Duration>,
    user_agent: Option<String>,
    credentials: Option<BasicCredentials>,
    inter_request_delay: Option<Duration>,
    batch_interval: Option<usize>,
    batch_rest: Option<Duration>,
    flush_every: Option<usize>,
    block_cooldown: Option<Duration>,
    max_consecutive_blocks: Option<u32>,
    no_data_status: Option<u16>,
    resume: bool,
    sample_mode: bool,
    sample_advanced: Option<usize>,
    sample_early: Option<usize>,
    advanced_labels: Vec<String>,
}

impl IngestConfigBuilder {
    pub fn session_url(mut self, url: impl Into<String>) -> Self {
        self.session_url = Some(url.into());
        self
    }

    pub fn fetch_url(mut self, url: impl Into<String>) -> Self {
        self.fetch_url = Some(url.into());
        self
    }

    pub fn records_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.records_path = Some(path.into());
        self
    }

    pub fn checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn session_max_age(mut self, max_age: Duration) -> Self {
        self.session_max_age = Some(max_age);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(BasicCredentials {
            user: user.into(),
            password: password.into(),
        });
        self
    }

    pub fn inter_request_delay(mut self, delay: Duration) -> Self {
        self.inter_request_delay = Some(delay);
        self
    }

    pub fn batch_interval(mut self, items: usize) -> Self {
        self.batch_interval = Some(items);
        self
    }

    pub fn batch_rest(mut self, rest: Duration) -> Self {
        self.batch_rest = Some(rest);
        self
    }

    pub fn flush_every(mut self, items: usize) -> Self {
        self.flush_every = Some(items);
        self
    }

    pub fn block_cooldown(mut self, cooldown: Duration) -> Self {
        self.block_cooldown = Some(cooldown);
        self
    }

    pub fn max_consecutive_blocks(mut self, blocks: u32) -> Self {
        self.max_consecutive_blocks = Some(blocks);
        self
    }

    pub fn no_data_status(mut self, status: u16) -> Self {
        self.no_data_status = Some(status);
        self
    }

    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn sample_mode(mut self, enabled: bool) -> Self {
        self.sample_mode = enabled;
        self
    }

    pub fn sample_advanced(mut self, count: usize) -> Self {
        self.sample_advanced = Some(count);
        self
    }

    pub fn sample_early(mut self, count: usize) -> Self {
        self.sample_early = Some(count);
        self
    }

    pub fn advanced_label(mut self, label: impl Into<String>) -> Self {
        self.advanced_labels.push(label.into());
        self
    }

    pub fn build(self) -> Result<IngestConfig> {
        let params = IngestConfigParams {
            session_url: self.session_url.context("session_url is required")?,
            fetch_url: self.fetch_url.context("fetch_url is required")?,
            records_path: self.records_path.context("records_path is required")?,
            checkpoint_path: self
                .checkpoint_path
                .context("checkpoint_path is required")?,
            request_timeout: self
                .request_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            session_max_age: self
                .session_max_age
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_SESSION_MAX_AGE_SECS)),
            user_agent: self
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned()),
            credentials: self.credentials,
            inter_request_delay: self
                .inter_request_delay
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_INTER_REQUEST_DELAY_MS)),
            batch_interval: self.batch_interval.unwrap_or(DEFAULT_BATCH_INTERVAL),
            batch_rest: self
                .batch_rest
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_BATCH_REST_SECS)),
            flush_every: self.flush_every.unwrap_or(DEFAULT_FLUSH_EVERY),
            block_cooldown: self
                .block_cooldown
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_BLOCK_COOLDOWN_SECS)),
            max_consecutive_blocks: self
                .max_consecutive_blocks
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_BLOCKS),
            no_data_status: self.no_data_status.unwrap_or(DEFAULT_NO_DATA_STATUS),
            resume: self.resume,
            sample_mode: self.sample_mode,
            sample_advanced: self.sample_advanced.unwrap_or(DEFAULT_SAMPLE_ADVANCED),
            sample_early: self.sample_early.unwrap_or(DEFAULT_SAMPLE_EARLY),
            advanced_labels: self.advanced_labels,
        };

        IngestConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_path(path: &Path, field: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str, field: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{field} must start with http:// or https://");
    }
    Ok(())
}
