//! Case keys, work items, and the persisted record entries that collected
//! delivery/document history is merged into.

use crate::fetch::outcome::{CaseRecords, FetchOutcome};
use anyhow::{bail, Error as AnyError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

const KEY_SEPARATOR: char = ':';

/// Composite identifier of one auction case: the court code plus the case number.
///
/// The canonical text form is `"{court_code}:{case_number}"`; it is what the
/// checkpoint file stores and what log lines print.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaseKey {
    court_code: String,
    case_number: String,
}

impl CaseKey {
    pub fn new(court_code: impl Into<String>, case_number: impl Into<String>) -> Self {
        Self {
            court_code: court_code.into().trim().to_owned(),
            case_number: case_number.into().trim().to_owned(),
        }
    }

    pub fn court_code(&self) -> &str {
        &self.court_code
    }

    pub fn case_number(&self) -> &str {
        &self.case_number
    }
}

impl fmt::Display for CaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.court_code, self.case_number)
    }
}

impl FromStr for CaseKey {
    type Err = AnyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let Some((court, case)) = value.split_once(KEY_SEPARATOR) else {
            bail!("case key `{value}` must look like <court>{KEY_SEPARATOR}<case number>");
        };
        if court.trim().is_empty() || case.trim().is_empty() {
            bail!("case key `{value}` has an empty court code or case number");
        }
        Ok(Self::new(court, case))
    }
}

impl Serialize for CaseKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CaseKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One unit of work: the case to collect plus metadata used only for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    key: CaseKey,
    display_name: Option<String>,
    label: Option<String>,
}

impl WorkItem {
    pub fn new(key: CaseKey) -> Self {
        Self {
            key,
            display_name: None,
            label: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn from_entry(entry: &RecordEntry) -> Self {
        Self {
            key: entry.key(),
            display_name: entry.display_name.clone(),
            label: entry.label.clone(),
        }
    }

    pub fn key(&self) -> &CaseKey {
        &self.key
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Auction stage label, used for sampling and per-label totals.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

/// What applying a [`FetchOutcome`] did to a [`RecordEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeEffect {
    /// Upstream records were stored.
    Stored,
    /// The case was checked and has nothing upstream.
    ConfirmedEmpty,
    /// The fetch failed; empty collections were written so the case settles.
    SettledWithError,
    /// Blocked outcomes never touch the entry.
    Untouched,
}

/// Persisted record of one case.
///
/// Every field the collector does not own is kept in `extra` and written back
/// verbatim, so merging never loses data produced elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEntry {
    pub court_code: String,
    pub case_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_records: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_records: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merger_records: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_case_info: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RecordEntry {
    pub fn new(key: &CaseKey) -> Self {
        Self {
            court_code: key.court_code().to_owned(),
            case_number: key.case_number().to_owned(),
            display_name: None,
            label: None,
            delivery_records: None,
            document_records: None,
            merger_records: None,
            prior_case_info: None,
            extra: Map::new(),
        }
    }

    pub fn key(&self) -> CaseKey {
        CaseKey::new(self.court_code.as_str(), self.case_number.as_str())
    }

    /// An entry is done once both primary collections are present, even when empty.
    pub fn is_done(&self) -> bool {
        self.delivery_records.is_some() && self.document_records.is_some()
    }

    pub fn apply_outcome(&mut self, outcome: FetchOutcome) -> MergeEffect {
        match outcome {
            FetchOutcome::Success(records) => {
                self.store_records(records);
                MergeEffect::Stored
            }
            FetchOutcome::NoData { .. } => {
                self.settle_empty();
                MergeEffect::ConfirmedEmpty
            }
            FetchOutcome::Error { .. } => {
                self.settle_empty();
                MergeEffect::SettledWithError
            }
            FetchOutcome::Blocked { .. } => MergeEffect::Untouched,
        }
    }

    fn store_records(&mut self, records: CaseRecords) {
        let CaseRecords {
            delivery_records,
            document_records,
            merger_records,
            prior_case,
        } = records;

        self.delivery_records = Some(delivery_records);
        self.document_records = Some(document_records);
        if !merger_records.is_empty() {
            self.merger_records = Some(merger_records);
        }
        if let Some(prior) = prior_case.filter(|value| !is_empty_value(value)) {
            self.prior_case_info = Some(prior);
        }
    }

    fn settle_empty(&mut self) {
        self.delivery_records = Some(Vec::new());
        self.document_records = Some(Vec::new());
    }
}

pub(crate) fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}
