//! Thread lifecycle endpoints: `CreateThread`, `ListThreads`,
//! `DeleteThread`, `GetThreadSnapshot`, `ListThreadMessages`.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use pincer_core::domain::{Message, Thread};

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_thread).get(list_threads))
        .route("/:thread_id", get(get_snapshot).delete(delete_thread))
        .route("/:thread_id/messages", get(list_messages))
}

async fn create_thread(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Thread>, AppError> {
    let thread = state.core.create_thread(&user.owner_id)?;
    Ok(Json(thread))
}

async fn list_threads(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Thread>>, AppError> {
    let threads = state.core.list_threads(&user.owner_id)?;
    Ok(Json(threads))
}

async fn get_snapshot(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<pincer_core::agent::ThreadSnapshot>, AppError> {
    let snapshot = state.core.get_thread_snapshot(&thread_id)?;
    Ok(Json(snapshot))
}

async fn delete_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<(), AppError> {
    state.core.delete_thread(&thread_id)?;
    Ok(())
}

async fn list_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<Vec<Message>>, AppError> {
    let messages = state.core.list_thread_messages(&thread_id)?;
    Ok(Json(messages))
}
