//! Raw and classified results of a single fetch attempt.

use serde_json::Value;
use std::fmt;

/// Body of an upstream response as the fetcher received it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawBody {
    Json(Value),
    Unparseable(String),
}

/// Everything one round trip produced, before any interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutcome {
    Response { status: u16, body: RawBody },
    Transport { message: String, timed_out: bool },
}

impl RawOutcome {
    pub fn json(status: u16, body: Value) -> Self {
        Self::Response {
            status,
            body: RawBody::Json(body),
        }
    }

    /// Parses `text` as JSON, keeping the raw text when it is not.
    pub fn from_text(status: u16, text: &str) -> Self {
        let body = match serde_json::from_str::<Value>(text) {
            Ok(value) => RawBody::Json(value),
            Err(_) => RawBody::Unparseable(text.to_owned()),
        };
        Self::Response { status, body }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            timed_out: true,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { timed_out: true, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Response { status, .. } => Some(*status),
            Self::Transport { .. } => None,
        }
    }
}

/// Collections extracted from a successful response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseRecords {
    pub delivery_records: Vec<Value>,
    pub document_records: Vec<Value>,
    pub merger_records: Vec<Value>,
    pub prior_case: Option<Value>,
}

/// Semantic result of one fetch attempt. Exactly one per attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(CaseRecords),
    NoData { message: String },
    Blocked { message: String },
    Error { status: Option<u16>, message: String },
}

impl FetchOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success(_) => OutcomeKind::Success,
            Self::NoData { .. } => OutcomeKind::NoData,
            Self::Blocked { .. } => OutcomeKind::Blocked,
            Self::Error { .. } => OutcomeKind::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    NoData,
    Blocked,
    Error,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoData => "no_data",
            Self::Blocked => "blocked",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
