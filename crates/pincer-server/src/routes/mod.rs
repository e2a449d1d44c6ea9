//! API routes — one module per resource group.

use axum::Router;

use crate::AppState;

mod approvals;
mod audit;
mod threads;
mod turns;

/// Build the API router with all endpoints.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/threads", threads::router().merge(turns::router()))
        .nest("/approvals", approvals::router())
        .nest("/audit", audit::router())
}
