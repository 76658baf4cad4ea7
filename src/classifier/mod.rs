//! LLM-driven genre classification pipeline.
//!
//! The orchestrator partitions the enriched library into bounded batches,
//! the batch classifier drives each one through a prompt/parse/retry loop
//! against the configured LLM provider, and results are merged back under
//! an integrity check so that every input track is accounted for exactly
//! once.

mod batch;
mod models;
mod orchestrator;
mod parse;
mod prompt;

pub use batch::{BatchClassifier, RetryPolicy};
pub use models::{
    AudioFeatures, Category, ClassificationStatus, RunReport, RunSummary, TrackClassification,
    TrackRecord,
};
pub use orchestrator::{IntegrityError, Orchestrator, OrchestratorConfig};
pub use parse::{parse_response, ParseError, ParsedEntry};
pub use prompt::build_prompt;
