use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Risk classification for a proposed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    Read,
    Write,
    Exfiltration,
    Destructive,
    High,
}

impl RiskClass {
    /// Only `Read` may be executed inline; everything else is
    /// approval-gated.
    pub fn is_inline_eligible(self) -> bool {
        matches!(self, RiskClass::Read)
    }
}

/// Where a proposed action originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSource {
    Chat,
    Job,
    Schedule,
}

/// The proposed-action status machine.
///
/// Legal transitions:
/// `Pending -> Approved -> Executed`
/// `Pending -> Approved -> Rejected(idempotency_conflict)`
/// `Pending -> Rejected(expired | by_user)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
}

/// A model-suggested side effect awaiting (or past) approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedAction {
    pub action_id: String,
    pub owner_id: String,
    pub source: ActionSource,
    pub source_id: String,
    pub tool: String,
    pub args: Value,
    pub risk_class: RiskClass,
    pub justification: String,
    pub idempotency_key: String,
    pub status: ActionStatus,
    pub rejection_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub turn_id: String,
}

/// Default approval expiry: 24h from creation.
pub const DEFAULT_APPROVAL_TTL_SECS: i64 = 24 * 60 * 60;

/// `(owner_id, tool, key) -> args_hash` binding that prevents a retried or
/// re-approved action from executing a side effect twice with different
/// arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub owner_id: String,
    pub tool: String,
    pub key: String,
    pub args_hash: String,
    pub result_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Per-thread allow-list entry authorizing repeated reads of a domain,
/// created the first time a user approves a domain-bound fetch for that
/// thread. Never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainGrant {
    pub domain: String,
    pub thread_id: String,
    pub created_at: DateTime<Utc>,
}
