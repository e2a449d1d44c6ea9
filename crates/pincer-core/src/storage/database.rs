//! SQLite connection handle and schema migrations.
//!
//! Pincer uses a single transactional relational store for all
//! entities. SQLite via `rusqlite` plays that role here: a single
//! `Connection` behind a mutex, opened once per process and shared by
//! reference, with schema applied on open rather than through a separate
//! migration runner.

use std::path::Path;

use anyhow::Result;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;

/// A single SQLite connection guarded by a mutex. All Core writes go
/// through this connection; Event Log sequence assignment needs exactly
/// one critical section, and routing every store through one connection
/// gives us that for free along with SQLite's single-writer semantics.
pub struct Database {
    conn: Mutex<Connection>,
}

/// Shared handle, cloned cheaply across tasks (orchestrator, Action
/// Executor, Expiry Worker all hold one).
pub type SharedDatabase = std::sync::Arc<Database>;

impl Database {
    /// Open (creating if absent) the database at `path` and apply schema.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database, used by tests — avoids touching disk.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn migrate(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS threads (
    thread_id   TEXT PRIMARY KEY,
    owner_id    TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    title       TEXT
);

CREATE TABLE IF NOT EXISTS messages (
    message_id  TEXT PRIMARY KEY,
    thread_id   TEXT NOT NULL REFERENCES threads(thread_id) ON DELETE CASCADE,
    role        TEXT NOT NULL,
    content     TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, created_at);

CREATE TABLE IF NOT EXISTS thread_events (
    event_id        TEXT PRIMARY KEY,
    thread_id       TEXT NOT NULL REFERENCES threads(thread_id) ON DELETE CASCADE,
    job_id          TEXT,
    turn_id         TEXT,
    sequence        INTEGER NOT NULL,
    occurred_at     TEXT NOT NULL,
    source          TEXT NOT NULL,
    content_trust   TEXT NOT NULL,
    payload         TEXT NOT NULL,
    UNIQUE(thread_id, sequence)
);
CREATE INDEX IF NOT EXISTS idx_events_thread_seq ON thread_events(thread_id, sequence);
CREATE INDEX IF NOT EXISTS idx_events_turn ON thread_events(turn_id);

CREATE TABLE IF NOT EXISTS proposed_actions (
    action_id           TEXT PRIMARY KEY,
    owner_id            TEXT NOT NULL,
    source              TEXT NOT NULL,
    source_id           TEXT NOT NULL,
    tool                TEXT NOT NULL,
    args                TEXT NOT NULL,
    risk_class          TEXT NOT NULL,
    justification       TEXT NOT NULL,
    idempotency_key     TEXT NOT NULL,
    status              TEXT NOT NULL,
    rejection_reason    TEXT,
    expires_at          TEXT NOT NULL,
    created_at          TEXT NOT NULL,
    turn_id             TEXT NOT NULL,
    UNIQUE(owner_id, tool, idempotency_key)
);
CREATE INDEX IF NOT EXISTS idx_actions_turn ON proposed_actions(turn_id);
CREATE INDEX IF NOT EXISTS idx_actions_status ON proposed_actions(status);

CREATE TABLE IF NOT EXISTS idempotency_records (
    owner_id    TEXT NOT NULL,
    tool        TEXT NOT NULL,
    key         TEXT NOT NULL,
    args_hash   TEXT NOT NULL,
    result_hash TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (owner_id, tool, key)
);

CREATE TABLE IF NOT EXISTS audit_entries (
    entry_id    TEXT PRIMARY KEY,
    event_type  TEXT NOT NULL,
    entity_id   TEXT NOT NULL,
    payload     TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_entries(created_at);

CREATE TABLE IF NOT EXISTS domain_grants (
    domain      TEXT NOT NULL,
    thread_id   TEXT NOT NULL REFERENCES threads(thread_id) ON DELETE CASCADE,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (domain, thread_id)
);
"#;
