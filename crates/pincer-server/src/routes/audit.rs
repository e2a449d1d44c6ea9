//! Audit conveyor read endpoint.

use axum::{extract::State, routing::get, Json, Router};
use pincer_core::domain::AuditEntry;

use crate::error::AppError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_audit))
}

async fn list_audit(State(state): State<AppState>) -> Result<Json<Vec<AuditEntry>>, AppError> {
    Ok(Json(state.core.list_audit()?))
}
