use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use docketsync::{
    CaseKey, CheckpointStore, IngestConfigBuilder, IngestConfig, ItemFetcher, OutcomeKind,
    ProgressCheckpoint, RawOutcome, RecordCollection, RecordEntry, RecordStore, RunObserver,
    SessionError, SessionManager, WorkItem,
};
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub fn case(number: &str) -> CaseKey {
    CaseKey::new("B000210", number)
}

pub fn base_config() -> IngestConfigBuilder {
    IngestConfig::builder()
        .session_url("http://auction.test/main")
        .fetch_url("http://auction.test/history")
        .records_path("cases.json")
        .checkpoint_path("progress.json")
}

pub fn success(marker: &str) -> RawOutcome {
    RawOutcome::json(
        200,
        json!({
            "status": 200,
            "data": {
                "deliveryRecords": [{"recipient": marker, "result": "delivered"}],
                "documentRecords": [{"title": format!("{marker} notice")}],
                "mergerRecords": [],
                "priorCase": null
            }
        }),
    )
}

pub fn no_data() -> RawOutcome {
    RawOutcome::json(404, json!({"status": 404, "message": "no records for this case"}))
}

pub fn blocked() -> RawOutcome {
    RawOutcome::json(
        403,
        json!({"status": 403, "message": "Abnormal access detected, please retry later"}),
    )
}

pub fn server_error() -> RawOutcome {
    RawOutcome::json(500, json!({"status": 500, "message": "internal failure"}))
}

#[derive(Default)]
struct SessionState {
    ensures: u32,
    refreshes: u32,
    failure: Option<SessionError>,
}

/// Session manager whose handle is the refresh generation.
#[derive(Clone, Default)]
pub struct ScriptedSession {
    state: Arc<Mutex<SessionState>>,
}

impl ScriptedSession {
    pub fn failing(error: SessionError) -> Self {
        let session = Self::default();
        session.state.lock().unwrap().failure = Some(error);
        session
    }

    pub fn ensures(&self) -> u32 {
        self.state.lock().unwrap().ensures
    }

    pub fn refreshes(&self) -> u32 {
        self.state.lock().unwrap().refreshes
    }
}

impl SessionManager for ScriptedSession {
    type Handle = u32;

    fn ensure_session(&mut self) -> BoxFuture<'_, Result<u32, SessionError>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.ensures += 1;
            match &state.failure {
                Some(err) => Err(err.clone()),
                None => Ok(state.refreshes),
            }
        };
        Box::pin(async move { result })
    }

    fn refresh_session(&mut self) -> BoxFuture<'_, Result<u32, SessionError>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.refreshes += 1;
            Ok(state.refreshes)
        };
        Box::pin(async move { result })
    }
}

/// Fetcher replaying per-case scripts; unscripted cases use the fallback or succeed.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    scripts: Arc<Mutex<HashMap<CaseKey, VecDeque<RawOutcome>>>>,
    fallback: Arc<Mutex<Option<RawOutcome>>>,
    calls: Arc<Mutex<Vec<(CaseKey, u32)>>>,
}

impl ScriptedFetcher {
    pub fn script(self, key: CaseKey, outcomes: Vec<RawOutcome>) -> Self {
        self.scripts.lock().unwrap().insert(key, outcomes.into());
        self
    }

    pub fn always(self, outcome: RawOutcome) -> Self {
        *self.fallback.lock().unwrap() = Some(outcome);
        self
    }

    pub fn calls(&self) -> Vec<CaseKey> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Session generation seen by every call, in call order.
    pub fn generations(&self) -> Vec<u32> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, generation)| *generation)
            .collect()
    }
}

impl ItemFetcher<u32> for ScriptedFetcher {
    fn fetch<'a>(&'a self, session: &'a u32, item: &'a WorkItem) -> BoxFuture<'a, RawOutcome> {
        let key = item.key().clone();
        self.calls.lock().unwrap().push((key.clone(), *session));

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        let outcome = scripted
            .or_else(|| self.fallback.lock().unwrap().clone())
            .unwrap_or_else(|| success(key.case_number()));

        Box::pin(async move { outcome })
    }
}

/// Record store persisting to an in-memory JSON document.
#[derive(Clone)]
pub struct MemoryRecordStore {
    document: Arc<Mutex<Value>>,
    saves: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl MemoryRecordStore {
    pub fn from_json(document: Value) -> Self {
        Self {
            document: Arc::new(Mutex::new(document)),
            saves: Arc::default(),
            failing: Arc::default(),
        }
    }

    /// Array-shaped store of the given cases, each carrying a `courtName`.
    pub fn with_cases(numbers: &[&str]) -> Self {
        let entries: Vec<Value> = numbers
            .iter()
            .map(|number| {
                json!({
                    "courtCode": "B000210",
                    "caseNumber": number,
                    "displayName": format!("2024타경{number}"),
                    "courtName": "Seoul Central District Court",
                })
            })
            .collect();
        Self::from_json(Value::Array(entries))
    }

    pub fn document(&self) -> Value {
        self.document.lock().unwrap().clone()
    }

    pub fn collection(&self) -> RecordCollection {
        RecordCollection::from_json(self.document()).unwrap()
    }

    pub fn entry(&self, key: &CaseKey) -> RecordEntry {
        self.collection().get(key).cloned().unwrap()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn fail_saves(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl RecordStore for MemoryRecordStore {
    fn load_all(&self) -> Result<RecordCollection> {
        RecordCollection::from_json(self.document())
    }

    fn save_all(&self, records: &RecordCollection) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("record store is read-only");
        }
        *self.document.lock().unwrap() = records.to_json()?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
pub struct MemoryCheckpointStore {
    saved: Arc<Mutex<Option<ProgressCheckpoint>>>,
    resume: bool,
}

impl MemoryCheckpointStore {
    pub fn new(resume: bool) -> Self {
        Self {
            saved: Arc::default(),
            resume,
        }
    }

    pub fn seeded(checkpoint: ProgressCheckpoint) -> Self {
        Self {
            saved: Arc::new(Mutex::new(Some(checkpoint))),
            resume: true,
        }
    }

    /// Same backing storage, with the resume flag changed.
    pub fn resuming(&self, resume: bool) -> Self {
        Self {
            saved: self.saved.clone(),
            resume,
        }
    }

    pub fn saved(&self) -> Option<ProgressCheckpoint> {
        self.saved.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<CaseKey> {
        self.saved()
            .map(|checkpoint| checkpoint.completed().cloned().collect())
            .unwrap_or_default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, total: usize) -> Result<ProgressCheckpoint> {
        match self.saved() {
            Some(checkpoint) if self.resume => Ok(checkpoint),
            _ => Ok(ProgressCheckpoint::new(total)),
        }
    }

    fn save(&self, checkpoint: &ProgressCheckpoint) -> Result<()> {
        *self.saved.lock().unwrap() = Some(checkpoint.clone());
        Ok(())
    }
}

/// Observer that cancels the run once `limit` items have settled.
pub struct CancelAfter {
    token: CancellationToken,
    limit: usize,
    settled: usize,
}

impl CancelAfter {
    pub fn new(token: CancellationToken, limit: usize) -> Self {
        Self {
            token,
            limit,
            settled: 0,
        }
    }
}

impl RunObserver for CancelAfter {
    fn item_settled(&mut self, _index: usize, _item: &WorkItem, _kind: OutcomeKind) {
        self.settled += 1;
        if self.settled >= self.limit {
            self.token.cancel();
        }
    }
}

/// Records observer callbacks for assertions.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl RunObserver for RecordingObserver {
    fn run_started(&mut self, pending: usize, total: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("started {pending}/{total}"));
    }

    fn item_settled(&mut self, index: usize, item: &WorkItem, kind: OutcomeKind) {
        self.events
            .lock()
            .unwrap()
            .push(format!("settled {index} {} {kind}", item.key()));
    }

    fn cooling_down(&mut self, item: &WorkItem, consecutive_blocks: u32, wait: Duration) {
        self.events.lock().unwrap().push(format!(
            "cooldown {} {consecutive_blocks} {}s",
            item.key(),
            wait.as_secs()
        ));
    }
}
