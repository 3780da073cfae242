//! Transport knobs for the HTTP session along with validation helpers so
//! callers can reason about timeouts, session lifetime, and credentials.

use anyhow::{bail, Result};
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SESSION_MAX_AGE_SECS: u64 = 30 * 60;
const DEFAULT_ESTABLISH_ATTEMPTS: usize = 3;
const DEFAULT_ESTABLISH_BACKOFF_MS: u64 = 2_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub request_timeout: Duration,
    pub max_age: Duration,
    pub user_agent: String,
    pub credentials: Option<BasicCredentials>,
    pub establish_attempts: usize,
    pub establish_backoff: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_age: Duration::from_secs(DEFAULT_SESSION_MAX_AGE_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            credentials: None,
            establish_attempts: DEFAULT_ESTABLISH_ATTEMPTS,
            establish_backoff: Duration::from_millis(DEFAULT_ESTABLISH_BACKOFF_MS),
        }
    }
}

impl SessionOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.max_age.is_zero() {
            bail!("max_age must be greater than 0");
        }
        if self.user_agent.trim().is_empty() {
            bail!("user_agent cannot be empty");
        }
        if self.establish_attempts == 0 {
            bail!("establish_attempts must be greater than 0");
        }
        if let Some(credentials) = &self.credentials {
            if credentials.user.trim().is_empty() {
                bail!("credentials user cannot be empty");
            }
        }
        Ok(())
    }
}
