//! Batch classification pipeline for economic indicators.
//!
//! Indicators are routed to a statistical family, classified by a
//! family-specific specialist, cross-checked against their own time
//! series, oriented for heat-map display, flagged for anomalies, and
//! (optionally) reviewed and repaired — all driven by batched LLM calls
//! with ID-based response pairing and two-level retry.

pub mod config;
pub mod error;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod stages;
pub mod storage;
pub mod taxonomy;

pub use config::Config;
pub use error::{Error, Result};
pub use model::{
    Classification, FailedIndicator, Family, FlagSeverity, FlaggedIndicator, Indicator,
    OrientationResult, PipelineExecution, ReviewAction, ReviewDecision, RouterResult,
    SamplePoint, SpecialistResult, StageOutcome, StageSummary, ValidationResult,
};
pub use pipeline::Pipeline;
pub use storage::SqliteStore;
pub use taxonomy::Taxonomy;
