//! The durable, per-thread ordered Event Log. Component A.
//!
//! `append` is the system's single point of truth for sequence assignment:
//! the whole read-MAX/insert/commit/fan-out cycle happens while holding the
//! process-wide `Database` lock, giving exactly one critical section for
//! sequence-assignment+insert — SQLite's single connection already forces
//! that serialization, so no extra lock is needed here.
//!
//! Live subscription uses a bounded channel per subscriber with an
//! unbounded spillover queue drained by a dedicated forwarder task: a
//! spawned task bridging a producer that must never block with a consumer
//! that drains at its own pace.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use rusqlite::{params, OptionalExtension};
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::domain::{ContentTrust, EventPayload, EventSource, ThreadEvent};

use super::database::Database;
use super::threads::parse_rfc3339;

/// Channel capacity before a subscriber's events spill into the unbounded
/// backlog queue.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

struct SubscriberInner {
    sender: mpsc::Sender<ThreadEvent>,
    spillover: SyncMutex<VecDeque<ThreadEvent>>,
    notify: Notify,
}

impl SubscriberInner {
    /// Never blocks. Preserves ordering by routing to the spillover queue
    /// once it is non-empty, so a later event can never overtake an
    /// earlier one that is still waiting for channel capacity.
    fn publish(&self, event: ThreadEvent) {
        let mut queue = self.spillover.lock();
        if !queue.is_empty() {
            queue.push_back(event);
            drop(queue);
            self.notify.notify_one();
            return;
        }
        drop(queue);

        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.spillover.lock().push_back(event);
                self.notify.notify_one();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Subscriber gone; dropped from the registry on next prune.
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

async fn run_forwarder(inner: Arc<SubscriberInner>) {
    loop {
        let next = { inner.spillover.lock().pop_front() };
        match next {
            Some(event) => {
                if inner.sender.send(event).await.is_err() {
                    return;
                }
            }
            None => {
                if inner.is_closed() {
                    return;
                }
                inner.notify.notified().await;
            }
        }
    }
}

/// A live subscription handle. Dropping it unregisters the subscriber.
pub struct Subscription {
    pub receiver: mpsc::Receiver<ThreadEvent>,
    thread_id: String,
    id: u64,
    registry: Arc<DashMap<String, Vec<(u64, Arc<SubscriberInner>)>>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(mut subs) = self.registry.get_mut(&self.thread_id) {
            subs.retain(|(id, _)| *id != self.id);
        }
    }
}

pub struct EventLog {
    db: Arc<Database>,
    subscribers: Arc<DashMap<String, Vec<(u64, Arc<SubscriberInner>)>>>,
    next_subscriber_id: std::sync::atomic::AtomicU64,
}

impl EventLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            subscribers: Arc::new(DashMap::new()),
            next_subscriber_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Append one event, assigning `event_id`/`occurred_at`/`sequence` if
    /// absent, and fan it out to live subscribers. Failure to commit
    /// surfaces to the caller as a retryable error with no event published
    ///.
    pub fn append(
        &self,
        thread_id: &str,
        turn_id: Option<&str>,
        job_id: Option<&str>,
        source: EventSource,
        content_trust: ContentTrust,
        payload: EventPayload,
    ) -> Result<ThreadEvent> {
        let mut conn = self.db.conn();
        let tx = conn.transaction().context("starting event append tx")?;

        let max_sequence: Option<i64> = tx
            .query_row(
                "SELECT MAX(sequence) FROM thread_events WHERE thread_id = ?1",
                params![thread_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let sequence = max_sequence.unwrap_or(0) as u64 + 1;

        let event = ThreadEvent {
            event_id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            job_id: job_id.map(str::to_string),
            turn_id: turn_id.map(str::to_string),
            sequence,
            occurred_at: Utc::now(),
            source,
            content_trust,
            payload,
        };

        let payload_json = serde_json::to_string(&event.payload)?;
        tx.execute(
            "INSERT INTO thread_events
                (event_id, thread_id, job_id, turn_id, sequence, occurred_at, source, content_trust, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.event_id,
                event.thread_id,
                event.job_id,
                event.turn_id,
                event.sequence as i64,
                event.occurred_at.to_rfc3339(),
                source_to_str(event.source),
                trust_to_str(event.content_trust),
                payload_json,
            ],
        )
        .context("inserting thread event")?;

        tx.commit().context("committing event append")?;
        drop(conn);

        self.publish(&event);
        Ok(event)
    }

    /// Ordered events with `sequence > from_sequence`, capped at `limit`.
    pub fn list(&self, thread_id: &str, from_sequence: u64, limit: u32) -> Result<Vec<ThreadEvent>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT event_id, thread_id, job_id, turn_id, sequence, occurred_at, source, content_trust, payload
             FROM thread_events
             WHERE thread_id = ?1 AND sequence > ?2
             ORDER BY sequence
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![thread_id, from_sequence as i64, limit as i64],
            Self::row_to_event,
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("listing thread events")
    }

    /// Subscribe to live events for a thread, delivered from the moment of
    /// subscription onward. Combine with `list` for
    /// replay-then-live; callers must dedupe by `event_id` and sort by
    /// `sequence` across the two sources.
    pub fn subscribe(&self, thread_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let inner = Arc::new(SubscriberInner {
            sender: tx,
            spillover: SyncMutex::new(VecDeque::new()),
            notify: Notify::new(),
        });
        let id = self
            .next_subscriber_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.subscribers
            .entry(thread_id.to_string())
            .or_default()
            .push((id, inner.clone()));
        tokio::spawn(run_forwarder(inner));

        Subscription {
            receiver: rx,
            thread_id: thread_id.to_string(),
            id,
            registry: self.subscribers.clone(),
        }
    }

    fn publish(&self, event: &ThreadEvent) {
        if let Some(mut subs) = self.subscribers.get_mut(&event.thread_id) {
            subs.retain(|(_, sub)| !sub.is_closed());
            for (_, sub) in subs.iter() {
                sub.publish(event.clone());
            }
        }
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<ThreadEvent> {
        let job_id: Option<String> = row.get(2)?;
        let turn_id: Option<String> = row.get(3)?;
        let sequence: i64 = row.get(4)?;
        let occurred_at: String = row.get(5)?;
        let source: String = row.get(6)?;
        let content_trust: String = row.get(7)?;
        let payload: String = row.get(8)?;
        Ok(ThreadEvent {
            event_id: row.get(0)?,
            thread_id: row.get(1)?,
            job_id,
            turn_id,
            sequence: sequence as u64,
            occurred_at: parse_rfc3339(&occurred_at),
            source: str_to_source(&source),
            content_trust: str_to_trust(&content_trust),
            payload: serde_json::from_str(&payload).unwrap_or(EventPayload::Heartbeat),
        })
    }
}

fn source_to_str(source: EventSource) -> &'static str {
    match source {
        EventSource::Model => "model",
        EventSource::Policy => "policy",
        EventSource::Tool => "tool",
        EventSource::System => "system",
    }
}

fn str_to_source(s: &str) -> EventSource {
    match s {
        "model" => EventSource::Model,
        "policy" => EventSource::Policy,
        "tool" => EventSource::Tool,
        _ => EventSource::System,
    }
}

fn trust_to_str(trust: ContentTrust) -> &'static str {
    match trust {
        ContentTrust::UntrustedModel => "untrusted_model",
        ContentTrust::TrustedValidated => "trusted_validated",
        ContentTrust::TrustedSystem => "trusted_system",
    }
}

fn str_to_trust(s: &str) -> ContentTrust {
    match s {
        "untrusted_model" => ContentTrust::UntrustedModel,
        "trusted_validated" => ContentTrust::TrustedValidated,
        _ => ContentTrust::TrustedSystem,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> EventLog {
        EventLog::new(Arc::new(Database::in_memory().unwrap()))
    }

    #[test]
    fn sequence_is_dense_and_increasing() {
        let log = log();
        // threads table has a foreign key on thread_events but we exercise
        // the log directly with a thread_id that exists.
        log.db
            .conn()
            .execute(
                "INSERT INTO threads (thread_id, owner_id, created_at, updated_at) VALUES ('t1','o1','x','x')",
                [],
            )
            .unwrap();

        let e1 = log
            .append("t1", None, None, EventSource::System, ContentTrust::TrustedSystem, EventPayload::TurnStarted)
            .unwrap();
        let e2 = log
            .append("t1", None, None, EventSource::System, ContentTrust::TrustedSystem, EventPayload::Heartbeat)
            .unwrap();
        assert_eq!(e1.sequence, 1);
        assert_eq!(e2.sequence, 2);

        let listed = log.list("t1", 0, 100).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].sequence, 1);
        assert_eq!(listed[1].sequence, 2);
    }

    #[tokio::test]
    async fn append_twice_with_same_payload_yields_distinct_adjacent_sequences() {
        let log = log();
        log.db
            .conn()
            .execute(
                "INSERT INTO threads (thread_id, owner_id, created_at, updated_at) VALUES ('t1','o1','x','x')",
                [],
            )
            .unwrap();
        let first = log
            .append("t1", None, None, EventSource::System, ContentTrust::TrustedSystem, EventPayload::Heartbeat)
            .unwrap();
        let second = log
            .append("t1", None, None, EventSource::System, ContentTrust::TrustedSystem, EventPayload::Heartbeat)
            .unwrap();
        assert_ne!(first.event_id, second.event_id);
        assert_eq!(second.sequence, first.sequence + 1);
    }

    #[tokio::test]
    async fn subscriber_receives_events_in_order() {
        let log = log();
        log.db
            .conn()
            .execute(
                "INSERT INTO threads (thread_id, owner_id, created_at, updated_at) VALUES ('t1','o1','x','x')",
                [],
            )
            .unwrap();
        let mut sub = log.subscribe("t1");
        log.append("t1", None, None, EventSource::System, ContentTrust::TrustedSystem, EventPayload::TurnStarted)
            .unwrap();
        log.append(
            "t1",
            None,
            None,
            EventSource::System,
            ContentTrust::TrustedSystem,
            EventPayload::TurnCompleted {
                assistant_message_id: "m1".into(),
            },
        )
        .unwrap();

        let first = sub.receiver.recv().await.unwrap();
        let second = sub.receiver.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
    }
}
