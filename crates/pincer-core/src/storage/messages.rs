//! Message persistence. Messages are immutable once inserted.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};

use crate::domain::{Message, MessageRole, MAX_MESSAGE_CONTENT_BYTES};

use super::database::Database;
use super::threads::parse_rfc3339;

/// Insert a message using `conn`, which may be a live transaction — used by
/// the Approval Store and Action Executor to insert a user-visible system
/// message in the same transaction that effects a status change.
pub fn insert_tx(
    conn: &Connection,
    thread_id: &str,
    role: MessageRole,
    content: &str,
) -> Result<Message> {
    if content.len() > MAX_MESSAGE_CONTENT_BYTES {
        bail!(
            "message content exceeds {} bytes",
            MAX_MESSAGE_CONTENT_BYTES
        );
    }
    let message = Message {
        message_id: uuid::Uuid::new_v4().to_string(),
        thread_id: thread_id.to_string(),
        role,
        content: content.to_string(),
        created_at: Utc::now(),
    };
    conn.execute(
        "INSERT INTO messages (message_id, thread_id, role, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            message.message_id,
            message.thread_id,
            role_to_str(role),
            message.content,
            message.created_at.to_rfc3339(),
        ],
    )?;
    Ok(message)
}

pub struct MessageStore<'a> {
    db: &'a Database,
}

impl<'a> MessageStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn insert(&self, thread_id: &str, role: MessageRole, content: &str) -> Result<Message> {
        insert_tx(&self.db.conn(), thread_id, role, content)
    }

    pub fn list_for_thread(&self, thread_id: &str) -> Result<Vec<Message>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT message_id, thread_id, role, content, created_at
             FROM messages WHERE thread_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map(params![thread_id], Self::row_to_message)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("listing messages")
    }

    /// History visible to the planner: every role except `system`, which is
    /// the planner's own framing concern.
    pub fn planner_history(&self, thread_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .list_for_thread(thread_id)?
            .into_iter()
            .filter(|m| m.role != MessageRole::System)
            .collect())
    }

    /// Count `[tool_call:...]` internal messages created since `since`,
    /// used by the Resumption Controller to reconstruct `steps_used`
    ///.
    pub fn count_tool_call_markers_since(
        &self,
        thread_id: &str,
        since: chrono::DateTime<Utc>,
    ) -> Result<u32> {
        let count: i64 = self.db.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE thread_id = ?1 AND role = 'internal'
               AND content LIKE '[tool_call:%' AND created_at >= ?2",
            params![thread_id, since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Most recent user message created at or before `cutoff` — used by the
    /// Resumption Controller to recover the text that started a turn
    ///.
    pub fn latest_user_message_before(
        &self,
        thread_id: &str,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<Option<Message>> {
        self.db
            .conn()
            .query_row(
                "SELECT message_id, thread_id, role, content, created_at
                 FROM messages
                 WHERE thread_id = ?1 AND role = 'user' AND created_at <= ?2
                 ORDER BY created_at DESC LIMIT 1",
                params![thread_id, cutoff.to_rfc3339()],
                Self::row_to_message,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .map_err(Into::into)
    }

    /// Delete messages older than `cutoff`. Used by the retention pruner;
    /// the 30-day default lives in `config::DEFAULT_MESSAGE_RETENTION_DAYS`.
    /// Does not touch the Event Log, which retains its own full history
    /// regardless of message retention.
    pub fn prune_older_than(&self, cutoff: chrono::DateTime<Utc>) -> Result<u64> {
        let deleted = self.db.conn().execute(
            "DELETE FROM messages WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted as u64)
    }

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
        let role: String = row.get(2)?;
        let created_at: String = row.get(4)?;
        Ok(Message {
            message_id: row.get(0)?,
            thread_id: row.get(1)?,
            role: str_to_role(&role),
            content: row.get(3)?,
            created_at: parse_rfc3339(&created_at),
        })
    }
}

fn role_to_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
        MessageRole::Internal => "internal",
    }
}

fn str_to_role(s: &str) -> MessageRole {
    match s {
        "user" => MessageRole::User,
        "assistant" => MessageRole::Assistant,
        "system" => MessageRole::System,
        _ => MessageRole::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ThreadStore;

    #[test]
    fn planner_history_excludes_system_role() {
        let db = Database::in_memory().unwrap();
        let threads = ThreadStore::new(&db);
        let thread = threads.create("owner-1").unwrap();
        let messages = MessageStore::new(&db);
        messages
            .insert(&thread.thread_id, MessageRole::System, "you are helpful")
            .unwrap();
        messages
            .insert(&thread.thread_id, MessageRole::User, "hi")
            .unwrap();
        let history = messages.planner_history(&thread.thread_id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, MessageRole::User);
    }

    #[test]
    fn oversized_content_is_rejected() {
        let db = Database::in_memory().unwrap();
        let threads = ThreadStore::new(&db);
        let thread = threads.create("owner-1").unwrap();
        let messages = MessageStore::new(&db);
        let huge = "x".repeat(MAX_MESSAGE_CONTENT_BYTES + 1);
        assert!(messages
            .insert(&thread.thread_id, MessageRole::User, &huge)
            .is_err());
    }

    #[test]
    fn prune_older_than_removes_only_stale_messages() {
        let db = Database::in_memory().unwrap();
        let threads = ThreadStore::new(&db);
        let thread = threads.create("owner-1").unwrap();
        let messages = MessageStore::new(&db);
        let old = messages
            .insert(&thread.thread_id, MessageRole::User, "old message")
            .unwrap();
        db.conn()
            .execute(
                "UPDATE messages SET created_at = ?1 WHERE message_id = ?2",
                params![
                    (Utc::now() - chrono::Duration::days(40)).to_rfc3339(),
                    old.message_id
                ],
            )
            .unwrap();
        messages
            .insert(&thread.thread_id, MessageRole::User, "recent message")
            .unwrap();

        let deleted = messages
            .prune_older_than(Utc::now() - chrono::Duration::days(30))
            .unwrap();
        assert_eq!(deleted, 1);
        let remaining = messages.list_for_thread(&thread.thread_id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "recent message");
    }
}
