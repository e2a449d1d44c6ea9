//! The `Planner` capability: the single seam between Pincer and
//! whatever model provider is driving a turn. Pincer's Core never talks to a
//! provider API directly — it calls this trait once per round.

use async_trait::async_trait;
use serde::Serialize;

use super::types::{AiToolCall, ModelMessage};

/// One round's worth of planner input.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub thread_id: String,
    pub user_text: String,
    /// Prior turn history, `system` role already excluded by the caller.
    pub history: Vec<ModelMessage>,
    pub step: u32,
    pub max_steps: u32,
}

/// One round's worth of planner output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlannerOutput {
    pub assistant_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub tool_calls: Vec<AiToolCall>,
}

/// Planner failure modes. A planner implementation is
/// expected to attempt one internal repair pass before returning
/// `Invalid` — if it still cannot produce well-formed output, the
/// orchestrator treats `Invalid` the same as `Failed`: both terminate the
/// round with `TurnFailed(FAILED_MODEL_OUTPUT, retryable = true)`.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("planner produced invalid output: {0}")]
    Invalid(String),
    #[error("planner call failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, request: PlanRequest) -> Result<PlannerOutput, PlannerError>;
}

/// Minimal planner used by tests and local development: echoes the user's
/// text back as the assistant message and never proposes a tool call, so a
/// turn always completes in a single step. The same illustrative role
/// `EchoToolExecutor` plays for `ToolExecutor` (`tools::executor`).
#[derive(Debug, Default)]
pub struct EchoPlanner;

#[async_trait]
impl Planner for EchoPlanner {
    async fn plan(&self, request: PlanRequest) -> Result<PlannerOutput, PlannerError> {
        Ok(PlannerOutput {
            assistant_message: format!("echo: {}", request.user_text),
            thinking: None,
            tool_calls: Vec::new(),
        })
    }
}
