pub mod fetch;
pub mod processor;
pub mod runtime;
pub mod session;
pub mod store;

pub use fetch::{
    BlockPolicy, CaseRecords, FetchMetrics, FetchMetricsSnapshot, FetchOutcome, HttpItemFetcher,
    ItemFetcher, OutcomeKind, PhraseBlockPolicy, RawBody, RawOutcome, ResultClassifier,
};
pub use processor::backoff::{BackoffController, BackoffDecision};
pub use processor::orchestrator::{Diagnosis, Orchestrator};
pub use processor::selection::{pending_items, PendingFilter, StageSample};
pub use processor::stats::{RunOutcome, RunReport, RunStatistics};
pub use runtime::config::{IngestConfig, IngestConfigBuilder, IngestConfigParams};
pub use runtime::error::IngestError;
pub use runtime::hooks::{NoopObserver, RunObserver};
pub use runtime::runner::{exit_status, Runner, EXIT_INTERRUPTED};
pub use runtime::telemetry::{init_tracing, report_summary};
pub use session::{
    BasicCredentials, HttpSession, HttpSessionManager, SessionError, SessionManager,
    SessionOptions,
};
pub use store::{
    CaseKey, CheckpointStore, CollectionShape, JsonCheckpointStore, JsonRecordStore, MergeEffect,
    ProgressCheckpoint, RecordCollection, RecordEntry, RecordStore, WorkItem,
};
