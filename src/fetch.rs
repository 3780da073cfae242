//! Single-request item fetching and the classification of raw responses.

pub mod classifier;
pub mod fetcher;
pub mod metrics;
pub mod outcome;

pub use classifier::{BlockPolicy, PhraseBlockPolicy, ResultClassifier};
pub use fetcher::{HttpItemFetcher, ItemFetcher};
pub use metrics::{FetchMetrics, FetchMetricsSnapshot};
pub use outcome::{CaseRecords, FetchOutcome, OutcomeKind, RawBody, RawOutcome};
