//! Error taxonomy for the workflow engine.
//!
//! `Validation`, `NotFound` and `Concurrency` surface to callers
//! immediately. `ExecutionError` and approval timeouts/rejections are
//! absorbed by the retry policy. `CompensationError` is absorbed inside the
//! rollback sweep.

use std::time::Duration;

use stepgate_types::error::RepositoryError;

/// Errors surfaced by the engine, gate, rollback engine and service.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Rollback(#[from] CompensationError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Map a repository miss to `NotFound` for `what`, keeping other errors.
pub(crate) fn or_not_found(what: impl std::fmt::Display) -> impl FnOnce(RepositoryError) -> EngineError {
    move |e| match e {
        RepositoryError::NotFound => EngineError::NotFound(what.to_string()),
        other => EngineError::Repository(other),
    }
}

/// Failure of a single task handler invocation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    #[error("invalid task input: {0}")]
    InvalidInput(String),

    #[error("task failed: {0}")]
    Failed(String),

    #[error("task timed out after {0:?}")]
    TimedOut(Duration),
}

/// Failure of a single compensation handler invocation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompensationError {
    #[error("compensation for step '{step_id}' failed: {message}")]
    Failed { step_id: String, message: String },
}
