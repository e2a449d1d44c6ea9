//! Unified error handling for the API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pincer_core::CoreError;
use serde::Serialize;

/// API error response body
#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

/// Application error types
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_argument", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "failed_precondition", msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "failed_model_output", msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
        };

        (
            status,
            Json(ApiError {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", err);
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON error: {}", err))
    }
}

/// Maps the Core's error taxonomy onto the HTTP envelope: `idempotency_conflict`
/// rides the same 409 as `failed_precondition` since both mean "this action
/// no longer applies".
impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidArgument(msg) => AppError::BadRequest(msg),
            CoreError::NotFound(msg) => AppError::NotFound(msg),
            CoreError::FailedPrecondition(msg) => AppError::Conflict(msg),
            CoreError::IdempotencyConflict { action_id } => {
                AppError::Conflict(format!("action {action_id} hit an idempotency conflict"))
            }
            CoreError::FailedModelOutput { detail, .. } => AppError::BadGateway(detail),
            CoreError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                AppError::Internal(err.to_string())
            }
        }
    }
}
