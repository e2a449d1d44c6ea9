//! Canonical event protocol for the turn orchestration core. `ThreadEvent`
//! is the single source of truth for every state transition the Core
//! makes; the durable per-thread event log is both the system's history
//! and its live stream — durable, per-thread ordered, and replayable
//! rather than a transient in-process channel payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where an event's content originated, for trust-boundary bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Model,
    Policy,
    Tool,
    System,
}

/// Trust level of an event's payload content. Untrusted model
/// output must never be treated as instruction by downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentTrust {
    UntrustedModel,
    TrustedValidated,
    TrustedSystem,
}

/// A durably persisted, strictly per-thread-ordered state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadEvent {
    pub event_id: String,
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    /// Monotonic, dense, strictly increasing per thread. Starts at 1.
    /// Assigned by the Event Log, never by the caller.
    pub sequence: u64,
    pub occurred_at: DateTime<Utc>,
    pub source: EventSource,
    pub content_trust: ContentTrust,
    pub payload: EventPayload,
}

/// Closed-set payload variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    TurnStarted,
    TurnPaused {
        pending_count: usize,
        steps_used: u32,
        steps_remaining: u32,
    },
    TurnResumed {
        steps_remaining: u32,
    },
    TurnCompleted {
        assistant_message_id: String,
    },
    TurnFailed {
        code: String,
        retryable: bool,
        detail: String,
    },

    AssistantTextDelta {
        delta: String,
    },
    AssistantMessageCommitted {
        message_id: String,
    },
    AssistantThinkingDelta {
        delta: String,
    },

    ToolCallPlanned {
        tool_call_id: String,
        tool: String,
        risk_class: crate::domain::RiskClass,
    },
    ToolExecutionStarted {
        tool_call_id: String,
        tool: String,
    },
    ToolExecutionOutputDelta {
        tool_call_id: String,
        stream: ToolStream,
        offset_bytes: u64,
        delta: String,
    },
    ToolExecutionFinished {
        tool_call_id: String,
        exit_code: Option<i32>,
        duration_ms: u64,
        timed_out: bool,
        truncated: bool,
    },

    PolicyDecisionMade {
        tool_call_id: String,
        decision: PolicyDecision,
    },
    ProposedActionCreated {
        action_id: String,
    },
    ProposedActionStatusChanged {
        action_id: String,
        status: crate::domain::ActionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        rejection_reason: Option<String>,
    },
    IdempotencyConflict {
        action_id: String,
    },

    Heartbeat,
    StreamGap {
        /// The lowest sequence the subscriber should re-fetch via replay;
        /// emitted when the live-delivery spillover queue had to drop the
        /// subscriber's slow-consumer buffer.
        resume_from_sequence: u64,
    },
}

/// Which logical output stream a tool-output delta belongs to. One
/// logical stream is delivered at a time — stdout deltas never interleave
/// with stderr deltas out of order within the same stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStream {
    Stdout,
    Stderr,
}

/// Outcome of a Policy Splitter decision for one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    InlineRead,
    RequireApproval,
    Blocked,
}
