//! Concrete error taxonomy for the Core. `CoreError` is the
//! single error type every public operation in [`crate::agent::operations`]
//! returns; `pincer-server` maps each variant to an HTTP error envelope,
//! adding two codes an approval conveyor needs beyond the common set:
//! `idempotency_conflict` and `failed_precondition`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("idempotency conflict for action {action_id}")]
    IdempotencyConflict { action_id: String },

    #[error("planner failed: {detail}")]
    FailedModelOutput { retryable: bool, detail: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// Stable string code, used by `pincer-server`'s error envelope and by
    /// tests that assert on error kind rather than message text.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidArgument(_) => "invalid_argument",
            CoreError::NotFound(_) => "not_found",
            CoreError::FailedPrecondition(_) => "failed_precondition",
            CoreError::IdempotencyConflict { .. } => "idempotency_conflict",
            CoreError::FailedModelOutput { .. } => "failed_model_output",
            CoreError::Internal(_) => "internal",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
