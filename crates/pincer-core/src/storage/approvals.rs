//! The Approval Store: the conveyor's status machine.
//! Component B.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;

use crate::domain::{
    ActionSource, ActionStatus, AuditEventType, ContentTrust, EventPayload, EventSource,
    MessageRole, ProposedAction, RiskClass,
};

use super::audit;
use super::database::Database;
use super::events::EventLog;
use super::threads::parse_rfc3339;

/// Insert a freshly proposed action plus its `action_proposed` audit row,
/// within a caller-owned transaction (the Turn Orchestrator's finalize
/// transaction). Fails on a duplicate
/// `(owner_id, tool, idempotency_key)` — the uniqueness constraint that
/// blocks duplicate proposals at insert time.
pub fn insert_proposed_tx(conn: &Connection, action: &ProposedAction) -> Result<()> {
    conn.execute(
        "INSERT INTO proposed_actions
            (action_id, owner_id, source, source_id, tool, args, risk_class, justification,
             idempotency_key, status, rejection_reason, expires_at, created_at, turn_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            action.action_id,
            action.owner_id,
            source_to_str(action.source),
            action.source_id,
            action.tool,
            action.args.to_string(),
            risk_to_str(action.risk_class),
            action.justification,
            action.idempotency_key,
            status_to_str(action.status),
            action.rejection_reason,
            action.expires_at.to_rfc3339(),
            action.created_at.to_rfc3339(),
            action.turn_id,
        ],
    )
    .context("inserting proposed action")?;

    audit::record(
        conn,
        AuditEventType::ActionProposed,
        &action.action_id,
        json!({ "tool": action.tool, "risk_class": action.risk_class, "turn_id": action.turn_id }),
    )?;
    Ok(())
}

pub struct ApprovalStore<'a> {
    db: &'a Database,
    events: &'a EventLog,
}

/// What happened as a result of `approve` — the caller-visible variant lets
/// the Resumption Controller and API layer distinguish "approved" from
/// "auto-rejected because it had already expired" without re-querying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApproveOutcome {
    Approved,
    ExpiredInstead,
}

impl<'a> ApprovalStore<'a> {
    pub fn new(db: &'a Database, events: &'a EventLog) -> Self {
        Self { db, events }
    }

    pub fn get(&self, action_id: &str) -> Result<Option<ProposedAction>> {
        self.db
            .conn()
            .query_row(
                "SELECT action_id, owner_id, source, source_id, tool, args, risk_class,
                        justification, idempotency_key, status, rejection_reason, expires_at,
                        created_at, turn_id
                 FROM proposed_actions WHERE action_id = ?1",
                params![action_id],
                Self::row_to_action,
            )
            .optional()
            .context("loading proposed action")
    }

    pub fn list_pending(&self) -> Result<Vec<ProposedAction>> {
        self.list_by_status("pending")
    }

    pub fn list_approved(&self, limit: u32) -> Result<Vec<ProposedAction>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT action_id, owner_id, source, source_id, tool, args, risk_class,
                    justification, idempotency_key, status, rejection_reason, expires_at,
                    created_at, turn_id
             FROM proposed_actions WHERE status = 'approved'
             ORDER BY created_at LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_action)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("listing approved actions")
    }

    pub fn list_by_turn(&self, turn_id: &str) -> Result<Vec<ProposedAction>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT action_id, owner_id, source, source_id, tool, args, risk_class,
                    justification, idempotency_key, status, rejection_reason, expires_at,
                    created_at, turn_id
             FROM proposed_actions WHERE turn_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![turn_id], Self::row_to_action)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("listing actions for turn")
    }

    pub fn count_pending_for_turn(&self, turn_id: &str) -> Result<u32> {
        let count: i64 = self.db.conn().query_row(
            "SELECT COUNT(*) FROM proposed_actions WHERE turn_id = ?1 AND status = 'pending'",
            params![turn_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    fn list_by_status(&self, status: &str) -> Result<Vec<ProposedAction>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT action_id, owner_id, source, source_id, tool, args, risk_class,
                    justification, idempotency_key, status, rejection_reason, expires_at,
                    created_at, turn_id
             FROM proposed_actions WHERE status = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![status], Self::row_to_action)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("listing proposed actions")
    }

    /// Approve a pending action. If the row has already
    /// passed its `expires_at`, it is rejected as expired instead — approval
    /// never resurrects an expired proposal.
    pub fn approve(&self, action_id: &str) -> Result<ApproveOutcome> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let action: ProposedAction = tx
            .query_row(
                "SELECT action_id, owner_id, source, source_id, tool, args, risk_class,
                        justification, idempotency_key, status, rejection_reason, expires_at,
                        created_at, turn_id
                 FROM proposed_actions WHERE action_id = ?1",
                params![action_id],
                Self::row_to_action,
            )
            .optional()?
            .ok_or_else(|| anyhow::anyhow!("action not found: {action_id}"))?;

        if action.status != ActionStatus::Pending {
            bail!("action {action_id} is not pending (failed_precondition)");
        }

        let outcome = if action.expires_at <= Utc::now() {
            tx.execute(
                "UPDATE proposed_actions SET status = 'rejected', rejection_reason = 'expired'
                 WHERE action_id = ?1",
                params![action_id],
            )?;
            audit::record(
                &tx,
                AuditEventType::ActionExpired,
                action_id,
                json!({ "reason": "expired" }),
            )?;
            ApproveOutcome::ExpiredInstead
        } else {
            tx.execute(
                "UPDATE proposed_actions SET status = 'approved' WHERE action_id = ?1",
                params![action_id],
            )?;
            audit::record(&tx, AuditEventType::ActionApproved, action_id, json!({}))?;

            if action.source == ActionSource::Chat {
                super::messages::insert_tx(
                    &tx,
                    &action.source_id,
                    MessageRole::System,
                    &format!("Approved: about to run '{}'.", action.tool),
                )?;
            }
            ApproveOutcome::Approved
        };

        tx.commit()?;
        drop(conn);

        let status = match outcome {
            ApproveOutcome::Approved => ActionStatus::Approved,
            ApproveOutcome::ExpiredInstead => ActionStatus::Rejected,
        };
        let rejection_reason = matches!(outcome, ApproveOutcome::ExpiredInstead)
            .then(|| "expired".to_string());
        self.emit_status_changed(&action, status, rejection_reason)?;

        Ok(outcome)
    }

    /// Reject a pending action with a caller-supplied reason.
    pub fn reject(&self, action_id: &str, reason: &str) -> Result<()> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let action: ProposedAction = tx
            .query_row(
                "SELECT action_id, owner_id, source, source_id, tool, args, risk_class,
                        justification, idempotency_key, status, rejection_reason, expires_at,
                        created_at, turn_id
                 FROM proposed_actions WHERE action_id = ?1",
                params![action_id],
                Self::row_to_action,
            )
            .optional()?
            .ok_or_else(|| anyhow::anyhow!("action not found: {action_id}"))?;

        if action.status != ActionStatus::Pending {
            bail!("action {action_id} is not pending (failed_precondition)");
        }

        tx.execute(
            "UPDATE proposed_actions SET status = 'rejected', rejection_reason = ?2
             WHERE action_id = ?1",
            params![action_id, reason],
        )?;
        audit::record(
            &tx,
            AuditEventType::ActionRejected,
            action_id,
            json!({ "reason": reason }),
        )?;
        tx.commit()?;
        drop(conn);

        self.emit_status_changed(&action, ActionStatus::Rejected, Some(reason.to_string()))?;
        Ok(())
    }

    /// Autonomously reject a pending action whose deadline has passed
    /// (Expiry Worker). No-op (returns `false`)
    /// if the row is no longer pending or has not yet expired.
    pub fn expire_if_due(&self, action_id: &str) -> Result<bool> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        let action: ProposedAction = match tx
            .query_row(
                "SELECT action_id, owner_id, source, source_id, tool, args, risk_class,
                        justification, idempotency_key, status, rejection_reason, expires_at,
                        created_at, turn_id
                 FROM proposed_actions WHERE action_id = ?1",
                params![action_id],
                Self::row_to_action,
            )
            .optional()?
        {
            Some(action) => action,
            None => return Ok(false),
        };

        if action.status != ActionStatus::Pending || action.expires_at > Utc::now() {
            return Ok(false);
        }

        tx.execute(
            "UPDATE proposed_actions SET status = 'rejected', rejection_reason = 'expired'
             WHERE action_id = ?1",
            params![action_id],
        )?;
        audit::record(
            &tx,
            AuditEventType::ActionExpired,
            action_id,
            json!({ "reason": "expired" }),
        )?;
        tx.commit()?;
        drop(conn);

        self.emit_status_changed(&action, ActionStatus::Rejected, Some("expired".into()))?;
        Ok(true)
    }

    /// CAS `Approved -> Executed`. Fails precondition if the row is no
    /// longer `Approved`.
    pub fn mark_executed(&self, action_id: &str) -> Result<()> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE proposed_actions SET status = 'executed' WHERE action_id = ?1 AND status = 'approved'",
            params![action_id],
        )?;
        if changed == 0 {
            bail!("action {action_id} is not approved (failed_precondition)");
        }
        let action: ProposedAction = tx.query_row(
            "SELECT action_id, owner_id, source, source_id, tool, args, risk_class,
                    justification, idempotency_key, status, rejection_reason, expires_at,
                    created_at, turn_id
             FROM proposed_actions WHERE action_id = ?1",
            params![action_id],
            Self::row_to_action,
        )?;
        audit::record(&tx, AuditEventType::ActionExecuted, action_id, json!({}))?;
        tx.commit()?;
        drop(conn);

        self.emit_status_changed(&action, ActionStatus::Executed, None)?;
        Ok(())
    }

    /// Transition an approved action to rejected on an idempotency
    /// conflict — non-fatal to the turn.
    pub fn reject_for_idempotency_conflict(&self, action_id: &str) -> Result<()> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        let action: ProposedAction = tx.query_row(
            "SELECT action_id, owner_id, source, source_id, tool, args, risk_class,
                    justification, idempotency_key, status, rejection_reason, expires_at,
                    created_at, turn_id
             FROM proposed_actions WHERE action_id = ?1",
            params![action_id],
            Self::row_to_action,
        )?;
        tx.execute(
            "UPDATE proposed_actions SET status = 'rejected', rejection_reason = 'idempotency_conflict'
             WHERE action_id = ?1",
            params![action_id],
        )?;
        audit::record(
            &tx,
            AuditEventType::IdempotencyConflict,
            action_id,
            json!({}),
        )?;
        tx.commit()?;
        drop(conn);

        self.events.append(
            &thread_id_for(&action),
            Some(&action.turn_id),
            None,
            EventSource::System,
            ContentTrust::TrustedSystem,
            EventPayload::IdempotencyConflict {
                action_id: action.action_id.clone(),
            },
        )?;
        self.emit_status_changed(&action, ActionStatus::Rejected, Some("idempotency_conflict".into()))?;
        Ok(())
    }

    fn emit_status_changed(
        &self,
        action: &ProposedAction,
        status: ActionStatus,
        rejection_reason: Option<String>,
    ) -> Result<()> {
        self.events.append(
            &thread_id_for(action),
            Some(&action.turn_id),
            None,
            EventSource::System,
            ContentTrust::TrustedSystem,
            EventPayload::ProposedActionStatusChanged {
                action_id: action.action_id.clone(),
                status,
                rejection_reason,
            },
        )?;
        Ok(())
    }

    fn row_to_action(row: &rusqlite::Row) -> rusqlite::Result<ProposedAction> {
        let source: String = row.get(2)?;
        let risk_class: String = row.get(6)?;
        let status: String = row.get(9)?;
        let expires_at: String = row.get(11)?;
        let created_at: String = row.get(12)?;
        let args: String = row.get(5)?;
        Ok(ProposedAction {
            action_id: row.get(0)?,
            owner_id: row.get(1)?,
            source: str_to_source(&source),
            source_id: row.get(3)?,
            tool: row.get(4)?,
            args: serde_json::from_str(&args).unwrap_or(serde_json::Value::Null),
            risk_class: str_to_risk(&risk_class),
            justification: row.get(7)?,
            idempotency_key: row.get(8)?,
            status: str_to_status(&status),
            rejection_reason: row.get(10)?,
            expires_at: parse_rfc3339(&expires_at),
            created_at: parse_rfc3339(&created_at),
            turn_id: row.get(13)?,
        })
    }
}

/// Chat-sourced actions carry the thread id as `source_id`; job/schedule
/// sourced actions aren't exercised by the current tests, but the
/// type still needs a thread to address the Event Log, so non-chat sources
/// fall back to `source_id` unchanged — it is expected to already be a
/// thread id in those cases.
fn thread_id_for(action: &ProposedAction) -> String {
    action.source_id.clone()
}

fn source_to_str(source: ActionSource) -> &'static str {
    match source {
        ActionSource::Chat => "chat",
        ActionSource::Job => "job",
        ActionSource::Schedule => "schedule",
    }
}

fn str_to_source(s: &str) -> ActionSource {
    match s {
        "chat" => ActionSource::Chat,
        "job" => ActionSource::Job,
        _ => ActionSource::Schedule,
    }
}

fn status_to_str(status: ActionStatus) -> &'static str {
    match status {
        ActionStatus::Pending => "pending",
        ActionStatus::Approved => "approved",
        ActionStatus::Rejected => "rejected",
        ActionStatus::Executed => "executed",
    }
}

fn str_to_status(s: &str) -> ActionStatus {
    match s {
        "pending" => ActionStatus::Pending,
        "approved" => ActionStatus::Approved,
        "executed" => ActionStatus::Executed,
        _ => ActionStatus::Rejected,
    }
}

fn risk_to_str(risk: RiskClass) -> &'static str {
    match risk {
        RiskClass::Read => "read",
        RiskClass::Write => "write",
        RiskClass::Exfiltration => "exfiltration",
        RiskClass::Destructive => "destructive",
        RiskClass::High => "high",
    }
}

fn str_to_risk(s: &str) -> RiskClass {
    match s {
        "read" => RiskClass::Read,
        "write" => RiskClass::Write,
        "exfiltration" => RiskClass::Exfiltration,
        "destructive" => RiskClass::Destructive,
        _ => RiskClass::High,
    }
}
