//! Error types for the orchestration core.

use uuid::Uuid;

/// Errors surfaced by the job store.
#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("job {id} not found")]
    NotFound { id: Uuid },

    #[error("invalid status transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: &'static str,
        to: &'static str,
    },

    #[error("job store backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

impl JobStoreError {
    /// Whether retrying the operation might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobStoreError::BackendUnavailable(_))
    }
}

/// Errors surfaced by the instrument store.
#[derive(Debug, thiserror::Error)]
pub enum InstrumentError {
    #[error("instrument {symbol} not found")]
    NotFound { symbol: String },

    #[error("validation failed for instrument {symbol}: {reason}")]
    ValidationError { symbol: String, reason: String },

    #[error("instrument store backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Low-level database/pool errors, shared by every store backed by Postgres.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("query failed: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("migration error: {0}")]
    Migration(String),
}

impl From<deadpool_postgres::PoolError> for DatabaseError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        DatabaseError::Pool(err.to_string())
    }
}

/// Errors surfaced by the model client.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("rate limit retries exhausted for {provider} after {attempts} attempts")]
    RateLimitExhausted { provider: String, attempts: u32 },

    #[error("model request to {provider} failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("model {provider} returned an invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("tool loop exceeded max turns ({max_turns})")]
    MaxTurnsExceeded { max_turns: u32 },

    #[error("tool invocation failed: {0}")]
    ToolError(String),

    #[error("model call cancelled")]
    Cancelled,

    #[error("model error from {provider}: {reason}")]
    ModelError { provider: String, reason: String },
}

impl LlmError {
    /// Whether this error represents a transient condition the backoff
    /// backoff policy should retry (rate limit or timeout).
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed { reason, .. } => {
                let lower = reason.to_lowercase();
                lower.contains("rate limit") || lower.contains("timeout") || lower.contains("429")
            }
            LlmError::ModelError { reason, .. } => {
                let lower = reason.to_lowercase();
                lower.contains("rate limit") || lower.contains("timeout")
            }
            _ => false,
        }
    }
}

/// Errors surfaced by a worker run.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("model loop failed: {0}")]
    Llm(#[from] LlmError),

    #[error("worker wall-clock budget of {budget_secs}s exceeded")]
    BudgetExceeded { budget_secs: u64 },

    #[error("worker terminated without writing its result slot")]
    MissingSlot,

    #[error("job store error while committing result: {0}")]
    JobStore(#[from] JobStoreError),

    #[error("too few results committed: got {got}, need at least {min}")]
    InsufficientResults { got: usize, min: usize },
}

/// Errors surfaced by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("job store error: {0}")]
    JobStore(#[from] JobStoreError),

    #[error("all specialist workers failed: {0}")]
    AllWorkersFailed(String),

    #[error("orchestrator wall-clock budget of {budget_secs}s exceeded")]
    BudgetExceeded { budget_secs: u64 },
}

/// Errors surfaced by the queue consumer.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("failed to receive messages: {0}")]
    ReceiveFailed(String),

    #[error("failed to acknowledge message: {0}")]
    AckFailed(String),

    #[error("failed to move message to dead-letter queue: {0}")]
    DeadLetterFailed(String),
}
