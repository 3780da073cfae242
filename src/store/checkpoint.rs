//! Durable record of which work items have settled, so an interrupted run can
//! resume without re-fetching anything.

use crate::store::atomic::write_atomic;
use crate::store::record::CaseKey;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Keys that were attempted and settled (including permanent errors), plus run
/// bookkeeping. The completed set only ever grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressCheckpoint {
    completed: BTreeSet<CaseKey>,
    total: usize,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProgressCheckpoint {
    pub fn new(total: usize) -> Self {
        let now = Utc::now();
        Self {
            completed: BTreeSet::new(),
            total,
            started_at: now,
            updated_at: now,
        }
    }

    /// In-memory only; returns `false` when the key was already recorded.
    pub fn mark_completed(&mut self, key: CaseKey) -> bool {
        self.completed.insert(key)
    }

    pub fn is_completed(&self, key: &CaseKey) -> bool {
        self.completed.contains(key)
    }

    pub fn completed(&self) -> impl Iterator<Item = &CaseKey> {
        self.completed.iter()
    }

    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn set_total(&mut self, total: usize) {
        self.total = total;
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

pub trait CheckpointStore: Send + Sync {
    /// Returns the stored checkpoint when resuming, otherwise a fresh one
    /// sized for `total` work items.
    fn load(&self, total: usize) -> Result<ProgressCheckpoint>;

    fn save(&self, checkpoint: &ProgressCheckpoint) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct JsonCheckpointStore {
    path: PathBuf,
    resume: bool,
}

impl JsonCheckpointStore {
    pub fn new(path: impl Into<PathBuf>, resume: bool) -> Self {
        Self {
            path: path.into(),
            resume,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for JsonCheckpointStore {
    fn load(&self, total: usize) -> Result<ProgressCheckpoint> {
        if !self.resume {
            return Ok(ProgressCheckpoint::new(total));
        }
        if !self.path.exists() {
            tracing::info!(
                path = %self.path.display(),
                "no checkpoint found; starting a fresh run"
            );
            return Ok(ProgressCheckpoint::new(total));
        }

        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read checkpoint {}", self.path.display()))?;
        let mut checkpoint: ProgressCheckpoint = serde_json::from_str(&text)
            .with_context(|| format!("checkpoint {} is corrupt", self.path.display()))?;
        checkpoint.set_total(total);

        tracing::info!(
            path = %self.path.display(),
            completed = checkpoint.completed_len(),
            started_at = %checkpoint.started_at(),
            "resuming from checkpoint"
        );
        Ok(checkpoint)
    }

    fn save(&self, checkpoint: &ProgressCheckpoint) -> Result<()> {
        let bytes =
            serde_json::to_vec_pretty(checkpoint).context("failed to encode checkpoint")?;
        write_atomic(&self.path, &bytes)
    }
}
