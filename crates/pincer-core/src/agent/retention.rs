//! Retention pruner. Peripheral to the Core's orchestration
//! logic (spec.md §3 calls it out as such) but still part of the data
//! model: periodically deletes idempotency records, audit entries, and
//! messages past their retention window. Deliberately its own task rather
//! than folded into the Action Executor or Expiry Worker's poll, matching
//! this crate's one-dedicated-periodic-worker-per-concern convention.
//!
//! Does not touch `threads` or `thread_events` — the Event Log is the
//! durable, append-only ledger and has no retention window of its own in
//! `spec.md`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::storage::{AuditStore, IdempotencyStore, MessageStore};

use super::core::PincerCore;

pub async fn run_retention_pruner(core: Arc<PincerCore>, sweep: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(sweep);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        let now = Utc::now();

        let idempotency = IdempotencyStore::new(&core.db);
        match idempotency
            .prune_older_than(now - chrono::Duration::days(core.config.idempotency_retention_days))
        {
            Ok(deleted) if deleted > 0 => {
                tracing::info!(deleted, "pruned stale idempotency records")
            }
            Ok(_) => {}
            Err(err) => tracing::error!(error = %err, "failed to prune idempotency records"),
        }

        let audit = AuditStore::new(&core.db);
        match audit.prune_older_than(now - chrono::Duration::days(core.config.audit_retention_days)) {
            Ok(deleted) if deleted > 0 => tracing::info!(deleted, "pruned stale audit entries"),
            Ok(_) => {}
            Err(err) => tracing::error!(error = %err, "failed to prune audit entries"),
        }

        let messages = MessageStore::new(&core.db);
        match messages.prune_older_than(now - chrono::Duration::days(core.config.message_retention_days)) {
            Ok(deleted) if deleted > 0 => tracing::info!(deleted, "pruned stale messages"),
            Ok(_) => {}
            Err(err) => tracing::error!(error = %err, "failed to prune messages"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::agent::HmacImageProxyRewriter;
    use crate::ai::{PlanRequest, Planner, PlannerError, PlannerOutput};
    use crate::domain::{AuditEventType, MessageRole};
    use crate::storage::{audit, AuditStore, IdempotencyStore, MessageStore};
    use crate::tools::EchoToolExecutor;

    use super::{run_retention_pruner, PincerCore};

    struct NeverPlanner;

    #[async_trait::async_trait]
    impl Planner for NeverPlanner {
        async fn plan(&self, _request: PlanRequest) -> Result<PlannerOutput, PlannerError> {
            Err(PlannerError::Failed("not expected to be called".into()))
        }
    }

    fn core() -> std::sync::Arc<PincerCore> {
        let image_proxy = std::sync::Arc::new(HmacImageProxyRewriter::new(b"test-key".to_vec()));
        PincerCore::in_memory(
            std::sync::Arc::new(NeverPlanner),
            std::sync::Arc::new(EchoToolExecutor::new()),
            image_proxy,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn sweep_prunes_stale_rows_across_all_three_stores() {
        let core = core();
        let thread = core.create_thread("owner-1").unwrap();

        // Stale message.
        let messages = MessageStore::new(&core.db);
        let old_message = messages
            .insert(&thread.thread_id, MessageRole::User, "ancient")
            .unwrap();
        core.db
            .conn()
            .execute(
                "UPDATE messages SET created_at = ?1 WHERE message_id = ?2",
                rusqlite::params![
                    (chrono::Utc::now() - chrono::Duration::days(40)).to_rfc3339(),
                    old_message.message_id
                ],
            )
            .unwrap();

        // Stale audit entry.
        audit::record(
            &core.db.conn(),
            AuditEventType::ActionProposed,
            "action-old",
            serde_json::Value::Null,
        )
        .unwrap();
        core.db
            .conn()
            .execute(
                "UPDATE audit_entries SET created_at = ?1 WHERE entity_id = 'action-old'",
                rusqlite::params![(chrono::Utc::now() - chrono::Duration::days(100)).to_rfc3339()],
            )
            .unwrap();

        // Stale idempotency record (via a proposed action, so the
        // uniqueness constraint on (owner, tool, key) isn't needed here).
        crate::storage::idempotency::insert(
            &core.db.conn(),
            "owner-1",
            "run_bash",
            "old-key",
            "hash",
            "",
        )
        .unwrap();
        core.db
            .conn()
            .execute(
                "UPDATE idempotency_records SET created_at = ?1 WHERE key = 'old-key'",
                rusqlite::params![(chrono::Utc::now() - chrono::Duration::days(100)).to_rfc3339()],
            )
            .unwrap();

        let cancel = tokio_util::sync::CancellationToken::new();
        let worker_cancel = cancel.clone();
        let worker = tokio::spawn(run_retention_pruner(
            core.clone(),
            Duration::from_millis(10),
            worker_cancel,
        ));
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        worker.await.unwrap();

        assert!(messages.list_for_thread(&thread.thread_id).unwrap().is_empty());
        let audit_store = AuditStore::new(&core.db);
        assert!(!audit_store
            .list()
            .unwrap()
            .iter()
            .any(|e| e.entity_id == "action-old"));
        let idempotency_store = IdempotencyStore::new(&core.db);
        assert!(idempotency_store
            .lookup("owner-1", "run_bash", "old-key")
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn sweep_leaves_fresh_rows_untouched() {
        let core = core();
        let thread = core.create_thread("owner-1").unwrap();
        let messages = MessageStore::new(&core.db);
        messages
            .insert(&thread.thread_id, MessageRole::User, "fresh")
            .unwrap();

        let cancel = tokio_util::sync::CancellationToken::new();
        let worker_cancel = cancel.clone();
        let worker = tokio::spawn(run_retention_pruner(
            core.clone(),
            Duration::from_millis(10),
            worker_cancel,
        ));
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        worker.await.unwrap();

        assert_eq!(messages.list_for_thread(&thread.thread_id).unwrap().len(), 1);
    }
}
