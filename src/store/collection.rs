//! The in-memory record collection and the [`RecordStore`] boundary that loads
//! and saves it as a whole.
//!
//! Record files come in two shapes: a JSON array of entries, or a JSON object
//! mapping an arbitrary key to each entry. A collection remembers which shape
//! it was loaded from, plus the original object keys and their order, so
//! saving writes back the same layout.

use crate::store::atomic::write_atomic;
use crate::store::record::{CaseKey, RecordEntry, WorkItem};
use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionShape {
    Sequence,
    Keyed,
}

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    map_key: Option<String>,
    entry: RecordEntry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordCollection {
    shape: CollectionShape,
    slots: Vec<Slot>,
    index: HashMap<CaseKey, usize>,
}

impl RecordCollection {
    pub fn sequence(entries: Vec<RecordEntry>) -> Self {
        let slots = entries
            .into_iter()
            .map(|entry| Slot {
                map_key: None,
                entry,
            })
            .collect();
        Self::from_slots(CollectionShape::Sequence, slots)
    }

    pub fn keyed(entries: Vec<(String, RecordEntry)>) -> Self {
        let slots = entries
            .into_iter()
            .map(|(map_key, entry)| Slot {
                map_key: Some(map_key),
                entry,
            })
            .collect();
        Self::from_slots(CollectionShape::Keyed, slots)
    }

    fn from_slots(shape: CollectionShape, slots: Vec<Slot>) -> Self {
        let mut index = HashMap::with_capacity(slots.len());
        for (position, slot) in slots.iter().enumerate() {
            let key = slot.entry.key();
            if index.contains_key(&key) {
                tracing::warn!(case = %key, "duplicate record entry; later copy is ignored");
                continue;
            }
            index.insert(key, position);
        }
        Self {
            shape,
            slots,
            index,
        }
    }

    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Array(items) => {
                let entries = items
                    .into_iter()
                    .enumerate()
                    .map(|(position, item)| {
                        serde_json::from_value::<RecordEntry>(item)
                            .with_context(|| format!("invalid record entry at index {position}"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::sequence(entries))
            }
            Value::Object(fields) => {
                let entries = fields
                    .into_iter()
                    .map(|(map_key, item)| -> Result<(String, RecordEntry)> {
                        let entry = serde_json::from_value::<RecordEntry>(item)
                            .with_context(|| format!("invalid record entry under key {map_key}"))?;
                        Ok((map_key, entry))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::keyed(entries))
            }
            other => bail!(
                "record store must be a JSON array or object, found {}",
                json_type_name(&other)
            ),
        }
    }

    pub fn to_json(&self) -> Result<Value> {
        match self.shape {
            CollectionShape::Sequence => {
                let items = self
                    .slots
                    .iter()
                    .map(|slot| serde_json::to_value(&slot.entry))
                    .collect::<Result<Vec<_>, _>>()
                    .context("failed to serialize record entries")?;
                Ok(Value::Array(items))
            }
            CollectionShape::Keyed => {
                let mut fields = Map::with_capacity(self.slots.len());
                for slot in &self.slots {
                    let map_key = slot
                        .map_key
                        .clone()
                        .unwrap_or_else(|| slot.entry.key().to_string());
                    let value = serde_json::to_value(&slot.entry).with_context(|| {
                        format!("failed to serialize record entry {map_key}")
                    })?;
                    fields.insert(map_key, value);
                }
                Ok(Value::Object(fields))
            }
        }
    }

    pub fn shape(&self) -> CollectionShape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RecordEntry> {
        self.slots.iter().map(|slot| &slot.entry)
    }

    pub fn get(&self, key: &CaseKey) -> Option<&RecordEntry> {
        self.index
            .get(key)
            .and_then(|position| self.slots.get(*position))
            .map(|slot| &slot.entry)
    }

    pub fn get_mut(&mut self, key: &CaseKey) -> Option<&mut RecordEntry> {
        let position = *self.index.get(key)?;
        self.slots.get_mut(position).map(|slot| &mut slot.entry)
    }

    pub fn is_done(&self, key: &CaseKey) -> bool {
        self.get(key).map(RecordEntry::is_done).unwrap_or(false)
    }

    /// One work item per distinct case key, in stored order.
    pub fn work_items(&self) -> Vec<WorkItem> {
        let mut seen = HashSet::with_capacity(self.slots.len());
        self.slots
            .iter()
            .filter(|slot| seen.insert(slot.entry.key()))
            .map(|slot| WorkItem::from_entry(&slot.entry))
            .collect()
    }

    pub fn work_item(&self, key: &CaseKey) -> Option<WorkItem> {
        self.get(key).map(WorkItem::from_entry)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// External persistence for the whole record collection.
pub trait RecordStore: Send + Sync {
    fn load_all(&self) -> Result<RecordCollection>;

    /// Overwrites the stored collection, preserving the shape it was loaded in.
    fn save_all(&self, records: &RecordCollection) -> Result<()>;
}

/// Record store backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonRecordStore {
    path: PathBuf,
}

impl JsonRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for JsonRecordStore {
    fn load_all(&self) -> Result<RecordCollection> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read record store {}", self.path.display()))?;
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("record store {} is not valid JSON", self.path.display()))?;
        RecordCollection::from_json(value)
    }

    fn save_all(&self, records: &RecordCollection) -> Result<()> {
        let value = records.to_json()?;
        let bytes = serde_json::to_vec_pretty(&value).context("failed to encode record store")?;
        write_atomic(&self.path, &bytes)
    }
}
