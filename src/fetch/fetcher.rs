//! Issues exactly one request per work item through the current session.
//!
//! Fetchers never retry and never classify: every attempt comes back as a
//! [`RawOutcome`] so retry policy stays with the orchestrator.

use crate::fetch::outcome::RawOutcome;
use crate::runtime::config::IngestConfig;
use crate::session::manager::HttpSession;
use crate::store::record::WorkItem;
use anyhow::{bail, Result};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::timeout;

pub trait ItemFetcher<H>: Send + Sync {
    fn fetch<'a>(&'a self, session: &'a H, item: &'a WorkItem) -> BoxFuture<'a, RawOutcome>;
}

/// Posts the case key as JSON to the history endpoint.
#[derive(Debug, Clone)]
pub struct HttpItemFetcher {
    endpoint: String,
    request_timeout: Duration,
}

impl ItemFetcher<HttpSession> for HttpItemFetcher {
    fn fetch<'a>(
        &'a self,
        session: &'a HttpSession,
        item: &'a WorkItem,
    ) -> BoxFuture<'a, RawOutcome> {
        Box::pin(self.fetch_once(session, item))
    }
}

impl HttpItemFetcher {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into().trim().to_owned();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            bail!("fetch_url must start with http:// or https://");
        }
        if request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        Ok(Self {
            endpoint,
            request_timeout,
        })
    }

    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        Self::new(config.fetch_url(), config.request_timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch_once(&self, session: &HttpSession, item: &WorkItem) -> RawOutcome {
        let case = item.key();
        let request = session
            .client()
            .post(&self.endpoint)
            .json(&request_body(item));

        let response = match timeout(self.request_timeout, request.send()).await {
            Err(_) => {
                return RawOutcome::timeout(format!(
                    "no response for {case} within {}ms",
                    self.request_timeout.as_millis()
                ));
            }
            Ok(Err(err)) if err.is_timeout() => return RawOutcome::timeout(err.to_string()),
            Ok(Err(err)) => return RawOutcome::transport(err.to_string()),
            Ok(Ok(response)) => response,
        };

        let status = response.status().as_u16();
        match timeout(self.request_timeout, response.text()).await {
            Err(_) => RawOutcome::timeout(format!("body of {case} did not arrive in time")),
            Ok(Err(err)) => RawOutcome::transport(format!("failed to read body of {case}: {err}")),
            Ok(Ok(text)) => {
                tracing::trace!(case = %case, status, bytes = text.len(), "fetched case history");
                RawOutcome::from_text(status, &text)
            }
        }
    }
}

fn request_body(item: &WorkItem) -> Value {
    json!({
        "courtCode": item.key().court_code(),
        "caseNumber": item.key().case_number(),
    })
}
