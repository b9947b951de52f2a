//! Error types surfaced by the pipeline orchestrator.
//!
//! Rate limiting is not an error here: the quota-aware executor absorbs it.

use crate::stage::Stage;

/// Errors that stop the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A stage terminated with a non-zero, non-retryable outcome.
    #[error("stage {stage} failed with exit code {code}")]
    FatalStage { stage: Stage, code: i32 },

    /// The stage program could not be started at all.
    #[error("failed to spawn stage {stage}: {source}")]
    Spawn {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },

    /// The persistent store could not be prepared.
    #[error("store initialization failed: {0}")]
    StoreInit(String),

    /// File-system failure while preparing working directories.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The pass ledger could not be written.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid process configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Cooperative cancellation was requested.
    #[error("pipeline cancelled")]
    Cancelled,
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        PipelineError::StoreInit(format!("sqlite: {e}"))
    }
}

impl PipelineError {
    /// Process exit status for this error.
    ///
    /// A fatal stage reports its own exit code; codes that do not survive
    /// truncation to a byte (or truncate to zero) become 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::FatalStage { code, .. } => match u8::try_from(*code) {
                Ok(0) | Err(_) => 1,
                Ok(c) => c,
            },
            PipelineError::Cancelled => 0,
            _ => 1,
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
