//! Ingestion loop: pending selection, block backoff, run statistics, and the
//! orchestrator that ties them together.

pub mod backoff;
pub mod orchestrator;
pub mod selection;
pub mod stats;
