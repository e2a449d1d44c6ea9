//! Turn submission and live-event endpoints: `SendTurn`/`StartTurn` and
//! `WatchThread`.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:thread_id/turns", post(send_turn))
        .route("/:thread_id/events", get(watch_thread))
}

#[derive(Deserialize)]
struct SendTurnRequest {
    text: String,
}

#[derive(Serialize)]
struct SendTurnResponse {
    turn_id: String,
}

async fn send_turn(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(body): Json<SendTurnRequest>,
) -> Result<Json<SendTurnResponse>, AppError> {
    let turn_id = state.core.send_turn(&thread_id, &body.text)?;
    Ok(Json(SendTurnResponse { turn_id }))
}

#[derive(Deserialize)]
struct WatchQuery {
    /// Replay events after this sequence before switching to the live
    /// stream, so a reconnecting client doesn't miss anything emitted
    /// between its last-seen event and the new subscription.
    since: Option<u64>,
}

async fn watch_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(query): Query<WatchQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let from_sequence = query.since.unwrap_or(0);
    let backlog = state
        .core
        .list_thread_events(&thread_id, from_sequence, u32::MAX)?;
    let subscription = state.core.watch_thread(&thread_id)?;

    let backlog_stream = stream::iter(backlog.into_iter().map(to_sse_event));
    let live_stream = stream::unfold(subscription, |mut sub| async move {
        sub.receiver.recv().await.map(|event| (to_sse_event(event), sub))
    });

    let combined = backlog_stream.chain(live_stream);
    Ok(Sse::new(combined).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn to_sse_event(event: pincer_core::domain::ThreadEvent) -> Result<Event, Infallible> {
    Ok(Event::default()
        .id(event.sequence.to_string())
        .event(event_name(&event.payload))
        .json_data(event)
        .unwrap_or_else(|_| Event::default().event("error").data("serialization failed")))
}

fn event_name(payload: &pincer_core::domain::EventPayload) -> &'static str {
    use pincer_core::domain::EventPayload::*;
    match payload {
        TurnStarted => "turn_started",
        TurnPaused { .. } => "turn_paused",
        TurnResumed { .. } => "turn_resumed",
        TurnCompleted { .. } => "turn_completed",
        TurnFailed { .. } => "turn_failed",
        AssistantTextDelta { .. } => "assistant_text_delta",
        AssistantMessageCommitted { .. } => "assistant_message_committed",
        AssistantThinkingDelta { .. } => "assistant_thinking_delta",
        ToolCallPlanned { .. } => "tool_call_planned",
        ToolExecutionStarted { .. } => "tool_execution_started",
        ToolExecutionOutputDelta { .. } => "tool_execution_output_delta",
        ToolExecutionFinished { .. } => "tool_execution_finished",
        PolicyDecisionMade { .. } => "policy_decision_made",
        ProposedActionCreated { .. } => "proposed_action_created",
        ProposedActionStatusChanged { .. } => "proposed_action_status_changed",
        IdempotencyConflict { .. } => "idempotency_conflict",
        Heartbeat => "heartbeat",
        StreamGap { .. } => "stream_gap",
    }
}
