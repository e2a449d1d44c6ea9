//! Idempotency records: `(owner_id, tool, key) ->
//! args_hash` binding that prevents a second approved action under the same
//! key from producing a second side effect with different arguments.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::IdempotencyRecord;

use super::database::Database;
use super::threads::parse_rfc3339;

/// Insert a fresh record, using `conn` so callers can participate in an
/// outer transaction.
pub fn insert(
    conn: &Connection,
    owner_id: &str,
    tool: &str,
    key: &str,
    args_hash: &str,
    result_hash: &str,
) -> Result<IdempotencyRecord> {
    let record = IdempotencyRecord {
        owner_id: owner_id.to_string(),
        tool: tool.to_string(),
        key: key.to_string(),
        args_hash: args_hash.to_string(),
        result_hash: result_hash.to_string(),
        created_at: Utc::now(),
    };
    conn.execute(
        "INSERT INTO idempotency_records (owner_id, tool, key, args_hash, result_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.owner_id,
            record.tool,
            record.key,
            record.args_hash,
            record.result_hash,
            record.created_at.to_rfc3339(),
        ],
    )
    .context("inserting idempotency record")?;
    Ok(record)
}

pub fn lookup(
    conn: &Connection,
    owner_id: &str,
    tool: &str,
    key: &str,
) -> Result<Option<IdempotencyRecord>> {
    conn.query_row(
        "SELECT owner_id, tool, key, args_hash, result_hash, created_at
         FROM idempotency_records WHERE owner_id = ?1 AND tool = ?2 AND key = ?3",
        params![owner_id, tool, key],
        |row| {
            let created_at: String = row.get(5)?;
            Ok(IdempotencyRecord {
                owner_id: row.get(0)?,
                tool: row.get(1)?,
                key: row.get(2)?,
                args_hash: row.get(3)?,
                result_hash: row.get(4)?,
                created_at: parse_rfc3339(&created_at),
            })
        },
    )
    .optional()
    .context("looking up idempotency record")
}

/// SHA-256 hex digest of the canonical argument JSON, used to detect
/// whether a replayed idempotency key carries different arguments.
pub fn hash_args(args: &serde_json::Value) -> String {
    sha256_hex(args.to_string().as_bytes())
}

/// SHA-256 hex digest of `"executed:" + action_id`, the `result_hash`
/// stored on preflight per spec §4.7 — a binding that the action was
/// actually executed, not merely a placeholder waiting to be back-filled.
pub fn hash_executed(action_id: &str) -> String {
    sha256_hex(format!("executed:{action_id}").as_bytes())
}

fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest.as_slice() {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

pub struct IdempotencyStore<'a> {
    db: &'a Database,
}

impl<'a> IdempotencyStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn lookup(&self, owner_id: &str, tool: &str, key: &str) -> Result<Option<IdempotencyRecord>> {
        lookup(&self.db.conn(), owner_id, tool, key)
    }

    /// Delete records older than `cutoff`. Used by the retention pruner;
    /// the 90-day default lives in `config::DEFAULT_IDEMPOTENCY_RETENTION_DAYS`.
    pub fn prune_older_than(&self, cutoff: chrono::DateTime<Utc>) -> Result<u64> {
        let deleted = self.db.conn().execute(
            "DELETE FROM idempotency_records WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_with_no_prior_record_returns_none() {
        let db = Database::in_memory().unwrap();
        let found = lookup(&db.conn(), "owner-1", "web_fetch", "key-1").unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn insert_then_lookup_round_trips_the_args_hash() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn();
        insert(&conn, "owner-1", "web_fetch", "key-1", "hash-abc", "").unwrap();

        let found = lookup(&conn, "owner-1", "web_fetch", "key-1").unwrap().unwrap();
        assert_eq!(found.args_hash, "hash-abc");
        assert_eq!(found.owner_id, "owner-1");
        assert_eq!(found.tool, "web_fetch");
    }

    #[test]
    fn hash_args_is_deterministic_and_sensitive_to_argument_changes() {
        let a = serde_json::json!({"url": "https://example.com"});
        let b = serde_json::json!({"url": "https://example.com"});
        let c = serde_json::json!({"url": "https://other.com"});
        assert_eq!(hash_args(&a), hash_args(&b));
        assert_ne!(hash_args(&a), hash_args(&c));
    }

    #[test]
    fn hash_executed_is_deterministic_and_sensitive_to_action_id() {
        assert_eq!(hash_executed("action-1"), hash_executed("action-1"));
        assert_ne!(hash_executed("action-1"), hash_executed("action-2"));
    }

    #[test]
    fn prune_older_than_removes_only_stale_records() {
        let db = Database::in_memory().unwrap();
        insert(&db.conn(), "owner-1", "web_fetch", "old-key", "hash-a", "").unwrap();
        db.conn()
            .execute(
                "UPDATE idempotency_records SET created_at = ?1 WHERE key = 'old-key'",
                params![(Utc::now() - chrono::Duration::days(100)).to_rfc3339()],
            )
            .unwrap();
        insert(&db.conn(), "owner-1", "web_fetch", "new-key", "hash-b", "").unwrap();

        let store = IdempotencyStore::new(&db);
        let deleted = store
            .prune_older_than(Utc::now() - chrono::Duration::days(90))
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.lookup("owner-1", "web_fetch", "old-key").unwrap().is_none());
        assert!(store.lookup("owner-1", "web_fetch", "new-key").unwrap().is_some());
    }
}
