//! Planner SDK types for provider communication.
//!
//! These are wire types for talking to whatever model provider backs the
//! `Planner` capability — they are not Pincer's domain types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::RiskClass;

/// Tool definition advertised to the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A tool call proposed by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiToolCall {
    /// Planner-assigned id, not the orchestrator's `tool_call_id` — the
    /// orchestrator always assigns its own fresh id for each proposed
    /// action.
    pub id: String,
    pub tool: String,
    pub arguments: Value,
    /// Risk hint the planner may supply; the Policy Splitter treats this as
    /// advisory only — it never trusts a risk_class computed by untrusted
    /// model output without separately applying its own classification
    /// rules.
    #[serde(default)]
    pub risk_class: Option<RiskClass>,
}

/// Message role in a conversation sent to the planner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// Content block types exchanged with the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Content {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        output: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Unified message format sent to the planner. History excludes the
/// `system` role — system framing is the planner implementation's own
/// concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: Role,
    pub content: Vec<Content>,
}

/// Finish reasons a planner implementation may report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    Other(String),
}

/// Token usage, kept for observability only — the Core has no budget
/// behavior keyed on token counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}
