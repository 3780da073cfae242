//! Runtime glue that wires configs, error taxonomy, hooks, telemetry, and
//! runner orchestration.

pub mod config;
pub mod error;
pub mod hooks;
pub mod runner;
pub mod telemetry;
