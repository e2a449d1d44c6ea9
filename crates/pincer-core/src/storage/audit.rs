//! Audit Sink. One row per lifecycle transition. Must be
//! writable from inside the same transaction that effects the state
//! change it records, so `record` takes any `&rusqlite::Connection` —
//! including an open `Transaction`, which derefs to one — rather than
//! owning its own connection.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::AuditEntry;

use super::database::Database;
use super::threads::parse_rfc3339;
use crate::domain::AuditEventType;

/// Append one audit row using `conn`, which may be a live transaction.
pub fn record(
    conn: &Connection,
    event_type: AuditEventType,
    entity_id: &str,
    payload: Value,
) -> Result<AuditEntry> {
    let entry = AuditEntry {
        entry_id: Uuid::new_v4().to_string(),
        event_type,
        entity_id: entity_id.to_string(),
        payload,
        created_at: Utc::now(),
    };
    conn.execute(
        "INSERT INTO audit_entries (entry_id, event_type, entity_id, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entry.entry_id,
            event_type_to_str(entry.event_type),
            entry.entity_id,
            entry.payload.to_string(),
            entry.created_at.to_rfc3339(),
        ],
    )
    .context("inserting audit entry")?;
    Ok(entry)
}

pub struct AuditStore<'a> {
    db: &'a Database,
}

impl<'a> AuditStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn list(&self) -> Result<Vec<AuditEntry>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT entry_id, event_type, entity_id, payload, created_at
             FROM audit_entries ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], |row| {
            let event_type: String = row.get(1)?;
            let payload: String = row.get(3)?;
            let created_at: String = row.get(4)?;
            Ok(AuditEntry {
                entry_id: row.get(0)?,
                event_type: str_to_event_type(&event_type),
                entity_id: row.get(2)?,
                payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
                created_at: parse_rfc3339(&created_at),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("listing audit entries")
    }

    pub fn count_for_entity(&self, entity_id: &str, event_type: AuditEventType) -> Result<u32> {
        let count: i64 = self.db.conn().query_row(
            "SELECT COUNT(*) FROM audit_entries WHERE entity_id = ?1 AND event_type = ?2",
            params![entity_id, event_type_to_str(event_type)],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Delete entries older than `cutoff`. Used by the retention pruner;
    /// the 90-day default lives in `config::DEFAULT_AUDIT_RETENTION_DAYS`.
    pub fn prune_older_than(&self, cutoff: chrono::DateTime<Utc>) -> Result<u64> {
        let deleted = self.db.conn().execute(
            "DELETE FROM audit_entries WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted as u64)
    }
}

fn event_type_to_str(event_type: AuditEventType) -> &'static str {
    match event_type {
        AuditEventType::ActionProposed => "action_proposed",
        AuditEventType::ActionApproved => "action_approved",
        AuditEventType::ActionRejected => "action_rejected",
        AuditEventType::ActionExpired => "action_expired",
        AuditEventType::ActionExecuted => "action_executed",
        AuditEventType::IdempotencyConflict => "idempotency_conflict",
        AuditEventType::DevicePaired => "device_paired",
        AuditEventType::DeviceRevoked => "device_revoked",
    }
}

fn str_to_event_type(s: &str) -> AuditEventType {
    match s {
        "action_proposed" => AuditEventType::ActionProposed,
        "action_approved" => AuditEventType::ActionApproved,
        "action_rejected" => AuditEventType::ActionRejected,
        "action_expired" => AuditEventType::ActionExpired,
        "action_executed" => AuditEventType::ActionExecuted,
        "idempotency_conflict" => AuditEventType::IdempotencyConflict,
        "device_paired" => AuditEventType::DevicePaired,
        _ => AuditEventType::DeviceRevoked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_entries_list_in_creation_order() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn();
        record(&conn, AuditEventType::ActionProposed, "action-1", Value::Null).unwrap();
        record(&conn, AuditEventType::ActionApproved, "action-1", Value::Null).unwrap();

        let store = AuditStore::new(&db);
        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_type, AuditEventType::ActionProposed);
        assert_eq!(entries[1].event_type, AuditEventType::ActionApproved);
        assert_eq!(entries[0].entity_id, "action-1");
    }

    #[test]
    fn count_for_entity_only_counts_matching_event_type() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn();
        record(&conn, AuditEventType::ActionProposed, "action-1", Value::Null).unwrap();
        record(&conn, AuditEventType::ActionApproved, "action-1", Value::Null).unwrap();
        record(&conn, AuditEventType::ActionApproved, "action-2", Value::Null).unwrap();

        let store = AuditStore::new(&db);
        assert_eq!(
            store
                .count_for_entity("action-1", AuditEventType::ActionApproved)
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .count_for_entity("action-1", AuditEventType::ActionProposed)
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .count_for_entity("action-3", AuditEventType::ActionApproved)
                .unwrap(),
            0
        );
    }

    #[test]
    fn payload_round_trips_through_storage() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn();
        let payload = serde_json::json!({"reason": "expired"});
        record(&conn, AuditEventType::ActionExpired, "action-1", payload.clone()).unwrap();

        let store = AuditStore::new(&db);
        let entries = store.list().unwrap();
        assert_eq!(entries[0].payload, payload);
    }

    #[test]
    fn prune_older_than_removes_only_stale_entries() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn();
        record(&conn, AuditEventType::ActionProposed, "action-old", Value::Null).unwrap();
        conn.execute(
            "UPDATE audit_entries SET created_at = ?1 WHERE entity_id = 'action-old'",
            params![(Utc::now() - chrono::Duration::days(100)).to_rfc3339()],
        )
        .unwrap();
        record(&conn, AuditEventType::ActionProposed, "action-new", Value::Null).unwrap();
        drop(conn);

        let store = AuditStore::new(&db);
        let deleted = store
            .prune_older_than(Utc::now() - chrono::Duration::days(90))
            .unwrap();
        assert_eq!(deleted, 1);
        let remaining = store.list().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].entity_id, "action-new");
    }
}
