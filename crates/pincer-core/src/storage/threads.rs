//! Thread CRUD.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::domain::Thread;

use super::database::Database;

pub struct ThreadStore<'a> {
    db: &'a Database,
}

impl<'a> ThreadStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn create(&self, owner_id: &str) -> Result<Thread> {
        let thread_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        self.db.conn().execute(
            "INSERT INTO threads (thread_id, owner_id, created_at, updated_at, title)
             VALUES (?1, ?2, ?3, ?3, NULL)",
            params![thread_id, owner_id, now.to_rfc3339()],
        )?;
        Ok(Thread {
            thread_id,
            owner_id: owner_id.to_string(),
            created_at: now,
            updated_at: now,
            title: None,
        })
    }

    pub fn get(&self, thread_id: &str) -> Result<Option<Thread>> {
        self.db
            .conn()
            .query_row(
                "SELECT thread_id, owner_id, created_at, updated_at, title
                 FROM threads WHERE thread_id = ?1",
                params![thread_id],
                Self::row_to_thread,
            )
            .optional()
            .context("loading thread")
    }

    pub fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Thread>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT thread_id, owner_id, created_at, updated_at, title
             FROM threads WHERE owner_id = ?1 ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map(params![owner_id], Self::row_to_thread)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("listing threads")
    }

    /// Bump `updated_at` — called on every orchestrator touch.
    pub fn touch(&self, thread_id: &str) -> Result<()> {
        self.db.conn().execute(
            "UPDATE threads SET updated_at = ?1 WHERE thread_id = ?2",
            params![Utc::now().to_rfc3339(), thread_id],
        )?;
        Ok(())
    }

    /// Set the title exactly once, on the first user message. No-op if a
    /// title is already set.
    pub fn set_title_if_absent(&self, thread_id: &str, title: &str) -> Result<()> {
        self.db.conn().execute(
            "UPDATE threads SET title = ?1 WHERE thread_id = ?2 AND title IS NULL",
            params![title, thread_id],
        )?;
        Ok(())
    }

    /// Delete a thread and every dependent row transactionally. Foreign
    /// keys with `ON DELETE CASCADE` cover messages,
    /// thread_events and domain_grants; proposed_actions reference threads
    /// only indirectly via turn_id so they are cleaned up explicitly.
    pub fn delete(&self, thread_id: &str) -> Result<()> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM proposed_actions WHERE turn_id IN
                (SELECT DISTINCT turn_id FROM thread_events WHERE thread_id = ?1 AND turn_id IS NOT NULL)",
            params![thread_id],
        )?;
        tx.execute("DELETE FROM threads WHERE thread_id = ?1", params![thread_id])?;
        tx.commit()?;
        Ok(())
    }

    fn row_to_thread(row: &rusqlite::Row) -> rusqlite::Result<Thread> {
        let created_at: String = row.get(2)?;
        let updated_at: String = row.get(3)?;
        Ok(Thread {
            thread_id: row.get(0)?,
            owner_id: row.get(1)?,
            created_at: parse_rfc3339(&created_at),
            updated_at: parse_rfc3339(&updated_at),
            title: row.get(4)?,
        })
    }
}

pub(super) fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
