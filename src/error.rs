use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Error taxonomy for the job lifecycle engine
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("invalid idempotency key: {0}")]
    InvalidKey(String),

    #[error("unsupported job type: {0}")]
    UnsupportedJobType(String),

    #[error("enqueue failed: {0}")]
    EnqueueFailure(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid lease token")]
    InvalidLeaseToken,

    #[error("lease has expired")]
    LeaseExpired,

    #[error("job is already in terminal state")]
    JobAlreadyTerminal,

    #[error("dead-letter write failed: {0}")]
    DeadLetterWriteFailure(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<prometheus::Error> for EngineError {
    fn from(err: prometheus::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
