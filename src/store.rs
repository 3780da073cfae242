//! Durable state: case records, the progress checkpoint, and atomic file writes.

mod atomic;
pub mod checkpoint;
pub mod collection;
pub mod record;

pub use checkpoint::{CheckpointStore, JsonCheckpointStore, ProgressCheckpoint};
pub use collection::{CollectionShape, JsonRecordStore, RecordCollection, RecordStore};
pub use record::{CaseKey, MergeEffect, RecordEntry, WorkItem};
