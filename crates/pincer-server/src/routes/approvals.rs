//! Pending-action endpoints: `ListApprovals`, `ApproveAction`,
//! `RejectAction`.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use pincer_core::domain::ProposedAction;
use serde::Deserialize;

use crate::error::AppError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_approvals))
        .route("/:action_id/approve", post(approve_action))
        .route("/:action_id/reject", post(reject_action))
}

async fn list_approvals(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProposedAction>>, AppError> {
    Ok(Json(state.core.list_approvals()?))
}

async fn approve_action(
    State(state): State<AppState>,
    Path(action_id): Path<String>,
) -> Result<Json<ProposedAction>, AppError> {
    Ok(Json(state.core.approve_action(&action_id)?))
}

#[derive(Deserialize, Default)]
struct RejectRequest {
    #[serde(default)]
    reason: String,
}

async fn reject_action(
    State(state): State<AppState>,
    Path(action_id): Path<String>,
    body: Option<Json<RejectRequest>>,
) -> Result<Json<ProposedAction>, AppError> {
    let reason = body.map(|Json(r)| r.reason).unwrap_or_default();
    let reason = if reason.is_empty() { "by_user" } else { &reason };
    Ok(Json(state.core.reject_action(&action_id, reason)?))
}
