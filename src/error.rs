//! Error types for the classification pipeline.

use thiserror::Error;

/// Result type alias using the crate's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the classification pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Transient error from an LLM call or the network beneath it: timeout,
    /// 5xx, malformed JSON, schema violation. Retried in-stage; this variant
    /// is only surfaced once a stage's retry budget is exhausted.
    #[error("transient error in stage {stage}: {message}")]
    Transient { stage: String, message: String },

    /// A persistent data error: a required field was missing, or an LLM
    /// returned a value outside its enumeration after all retries.
    #[error("persistent data error for indicator {indicator_id}, field {field}: {message}")]
    PersistentData {
        indicator_id: String,
        field: String,
        message: String,
    },

    /// The storage layer is transiently unreachable (lock contention, busy
    /// file). Retriable.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The storage layer rejected a write due to a constraint violation that
    /// retrying will not fix.
    #[error("storage conflict: {0}")]
    Conflict(String),

    /// Underlying SQLite error not otherwise classified.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// LLM API error carrying the provider name for diagnostics.
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// Operation timed out.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error, detected at startup. Fail-fast.
    #[error("configuration error: {0}")]
    Config(String),

    /// The pipeline run was cancelled. Not an error outcome in the usual
    /// sense: committed rows remain, the driver exits reporting partial
    /// progress.
    #[error("execution cancelled")]
    Cancelled,

    /// Catch-all for conditions that should be unreachable.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn transient(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn persistent_data(
        indicator_id: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::PersistentData {
            indicator_id: indicator_id.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Maps this error to the process exit code contract: 0 success, 1
    /// validation error, 2 transient failure exhausted, 3 storage error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 1,
            Error::Transient { .. } | Error::Timeout { .. } | Error::LlmApi { .. } => 2,
            Error::StorageUnavailable(_) | Error::Conflict(_) | Error::Storage(_) => 3,
            Error::PersistentData { .. } | Error::Serialization(_) => 1,
            Error::Cancelled => 0,
            Error::Internal(_) => 3,
        }
    }
}
