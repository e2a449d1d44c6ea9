//! Per-thread domain allow-list. Created on successful
//! execution of a domain-bound fetch; never mutated, only inserted.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};

use super::database::Database;

pub fn grant(conn: &Connection, domain: &str, thread_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO domain_grants (domain, thread_id, created_at) VALUES (?1, ?2, ?3)",
        params![domain, thread_id, Utc::now().to_rfc3339()],
    )
    .context("inserting domain grant")?;
    Ok(())
}

pub struct DomainGrantStore<'a> {
    db: &'a Database,
}

impl<'a> DomainGrantStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn is_granted(&self, thread_id: &str, domain: &str) -> Result<bool> {
        let count: i64 = self.db.conn().query_row(
            "SELECT COUNT(*) FROM domain_grants WHERE thread_id = ?1 AND domain = ?2",
            params![thread_id, domain],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn grant(&self, thread_id: &str, domain: &str) -> Result<()> {
        grant(&self.db.conn(), domain, thread_id)
    }
}
