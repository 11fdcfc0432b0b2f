// THEORY:
// This file is the main entry point for the `radiograph_triage` library crate.
// It turns one uploaded chest radiograph into a density overlay for display and a
// triage decision with its treatment protocol.
//
// The public face is `TriageEngine` (one synchronous call per image) and
// `TriageWorkerPool` (the same call fanned out over tokio workers). The component
// modules under `core_modules` stay public so a host can reuse the enhancer, the
// shape negotiation or the protocol table on their own.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::TriageConfig;
pub use core_modules::classification::{Classification, TriageLabel};
pub use core_modules::inference::{FnScorer, Scorer};
pub use error::{ConfigError, DecodeError, InferenceUnavailable, ScorerError, TriageError, UnknownPathogen};
pub use parallel_pipeline::TriageWorkerPool;
pub use pipeline::{TriageEngine, TriageReport, TriageSummary};
