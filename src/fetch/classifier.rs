//! Turns a [`RawOutcome`] into a [`FetchOutcome`].
//!
//! Rules apply in a fixed priority order: transport failure, unparseable or
//! non-object body, block detection, the no-data status, any other non-2xx
//! status, and finally success. A block message paired with an HTTP failure classifies as
//! `Blocked`, never as `Error`.

use crate::fetch::outcome::{CaseRecords, FetchOutcome, RawBody, RawOutcome};
use crate::store::record::is_empty_value;
use serde_json::Value;
use std::sync::Arc;

pub const DELIVERY_RECORDS_FIELD: &str = "deliveryRecords";
pub const DOCUMENT_RECORDS_FIELD: &str = "documentRecords";
pub const MERGER_RECORDS_FIELD: &str = "mergerRecords";
pub const PRIOR_CASE_FIELD: &str = "priorCase";

/// Status the service uses for "no records exist for this case".
pub const DEFAULT_NO_DATA_STATUS: u16 = 404;
pub const DEFAULT_BLOCK_FLAG_FIELD: &str = "accessAllowed";
pub const DEFAULT_BLOCK_PHRASES: &[&str] = &[
    "blocked",
    "too many requests",
    "abnormal access",
    "access restricted",
    "차단",
    "비정상적인 접근",
];

const DATA_FIELD: &str = "data";
const MESSAGE_FIELD: &str = "message";
const STATUS_FIELD: &str = "status";
const UNPARSEABLE_BODY: &str = "unparseable body";

/// Decides whether a parsed response is an upstream block signal.
///
/// Block detection is reverse-engineered from observed responses, so it is a
/// replaceable policy rather than a fixed rule.
pub trait BlockPolicy: Send + Sync {
    fn is_blocked(&self, message: Option<&str>, body: &Value) -> bool;
}

/// Matches case-insensitive phrases in the message field, or an explicit
/// boolean flag that is present and `false`.
#[derive(Debug, Clone)]
pub struct PhraseBlockPolicy {
    phrases: Vec<String>,
    flag_field: Option<String>,
}

impl Default for PhraseBlockPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_BLOCK_PHRASES.iter().copied(),
            Some(DEFAULT_BLOCK_FLAG_FIELD),
        )
    }
}

impl PhraseBlockPolicy {
    pub fn new<I, S>(phrases: I, flag_field: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|phrase| phrase.as_ref().trim().to_lowercase())
            .filter(|phrase| !phrase.is_empty())
            .collect();
        Self {
            phrases,
            flag_field: flag_field.map(str::to_owned),
        }
    }
}

impl BlockPolicy for PhraseBlockPolicy {
    fn is_blocked(&self, message: Option<&str>, body: &Value) -> bool {
        if let Some(message) = message {
            let message = message.to_lowercase();
            if self.phrases.iter().any(|phrase| message.contains(phrase)) {
                return true;
            }
        }

        let Some(field) = self.flag_field.as_deref() else {
            return false;
        };
        let nested = body.get(DATA_FIELD).and_then(|data| data.get(field));
        [body.get(field), nested]
            .into_iter()
            .flatten()
            .filter_map(Value::as_bool)
            .any(|allowed| !allowed)
    }
}

#[derive(Clone)]
pub struct ResultClassifier {
    policy: Arc<dyn BlockPolicy>,
    no_data_status: u16,
}

impl Default for ResultClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_NO_DATA_STATUS)
    }
}

impl std::fmt::Debug for ResultClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultClassifier")
            .field("no_data_status", &self.no_data_status)
            .finish_non_exhaustive()
    }
}

impl ResultClassifier {
    pub fn new(no_data_status: u16) -> Self {
        Self {
            policy: Arc::new(PhraseBlockPolicy::default()),
            no_data_status,
        }
    }

    pub fn with_block_policy(mut self, policy: impl BlockPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn no_data_status(&self) -> u16 {
        self.no_data_status
    }

    pub fn classify(&self, raw: &RawOutcome) -> FetchOutcome {
        let (http_status, body) = match raw {
            RawOutcome::Transport { message, timed_out } => {
                let message = if *timed_out {
                    format!("request timed out: {message}")
                } else {
                    message.clone()
                };
                return FetchOutcome::Error {
                    status: None,
                    message,
                };
            }
            RawOutcome::Response {
                status,
                body: RawBody::Unparseable(_),
            } => {
                return FetchOutcome::Error {
                    status: Some(*status),
                    message: UNPARSEABLE_BODY.to_owned(),
                };
            }
            RawOutcome::Response {
                status,
                body: RawBody::Json(body),
            } if !body.is_object() => {
                return FetchOutcome::Error {
                    status: Some(*status),
                    message: UNPARSEABLE_BODY.to_owned(),
                };
            }
            RawOutcome::Response {
                status,
                body: RawBody::Json(body),
            } => (*status, body),
        };

        let message = body.get(MESSAGE_FIELD).and_then(Value::as_str);

        if self.policy.is_blocked(message, body) {
            return FetchOutcome::Blocked {
                message: message.unwrap_or("request blocked upstream").to_owned(),
            };
        }

        let status = effective_status(http_status, body);
        if status == self.no_data_status {
            return FetchOutcome::NoData {
                message: message.unwrap_or("no records for case").to_owned(),
            };
        }

        if !is_success_status(status) {
            return FetchOutcome::Error {
                status: Some(status),
                message: message
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("upstream returned status {status}")),
            };
        }

        FetchOutcome::Success(extract_records(body))
    }
}

/// The HTTP status when it signals failure, otherwise the body's own `status`
/// field when it carries one.
fn effective_status(http_status: u16, body: &Value) -> u16 {
    if !is_success_status(http_status) {
        return http_status;
    }

    body.get(STATUS_FIELD)
        .and_then(Value::as_u64)
        .and_then(|status| u16::try_from(status).ok())
        .unwrap_or(http_status)
}

fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}

fn extract_records(body: &Value) -> CaseRecords {
    let data = body
        .get(DATA_FIELD)
        .filter(|value| value.is_object())
        .unwrap_or(body);

    let list = |field: &str| {
        data.get(field)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    };

    CaseRecords {
        delivery_records: list(DELIVERY_RECORDS_FIELD),
        document_records: list(DOCUMENT_RECORDS_FIELD),
        merger_records: list(MERGER_RECORDS_FIELD),
        prior_case: data
            .get(PRIOR_CASE_FIELD)
            .filter(|value| !is_empty_value(value))
            .cloned(),
    }
}
