//! Domain model: the entities the Core persists and reasons
//! about, independent of how they are stored or transported.

mod action;
mod event;
mod thread;

pub use action::{
    ActionSource, ActionStatus, DomainGrant, IdempotencyRecord, ProposedAction, RiskClass,
};
pub use event::{ContentTrust, EventPayload, EventSource, PolicyDecision, ThreadEvent, ToolStream};
pub use thread::{derive_title, Message, MessageRole, Thread};

/// One row of the audit conveyor. Append-only, never
/// mutated once written.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub event_type: AuditEventType,
    pub entity_id: String,
    pub payload: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Closed set of audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ActionProposed,
    ActionApproved,
    ActionRejected,
    ActionExpired,
    ActionExecuted,
    IdempotencyConflict,
    DevicePaired,
    DeviceRevoked,
}
