//! Planner-facing wire types and the `Planner` capability contract.
//!
//! Pincer does not implement a model provider itself — the planner is an
//! external collaborator, specified only by the `Plan` capability (see
//! `planner::Planner`). This module carries the small set of
//! provider-agnostic types the capability's inputs and outputs are
//! expressed in, deliberately narrower than a full multi-provider client
//! stack (per-provider request/response translation, SSE parsing,
//! retries) since none of that has a role to play here.

pub mod planner;
pub mod types;

pub use planner::{EchoPlanner, PlanRequest, Planner, PlannerError, PlannerOutput};
pub use types::{AiTool, AiToolCall, Content, FinishReason, ModelMessage, Role, Usage};
