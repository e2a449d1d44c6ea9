//! The Core's public API surface. Component J.
//!
//! Every operation here is a thin, `CoreResult`-returning wrapper around the
//! storage layer and the turn-orchestration components. `pincer-server`'s
//! route handlers call straight into these and do no orchestration of
//! their own.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::{AuditEntry, Message, ProposedAction, Thread, ThreadEvent};
use crate::error::{CoreError, CoreResult};
use crate::storage::{
    ApprovalStore, ApproveOutcome, AuditStore, MessageStore, Subscription, ThreadStore,
};

use super::core::PincerCore;

/// A convenience aggregate over thread, message, and pending-action reads.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ThreadSnapshot {
    pub thread: Thread,
    pub recent_messages: Vec<Message>,
    pub pending_actions: Vec<ProposedAction>,
    pub last_sequence: u64,
}

impl PincerCore {
    pub fn create_thread(&self, owner_id: &str) -> CoreResult<Thread> {
        ThreadStore::new(&self.db).create(owner_id).map_err(CoreError::Internal)
    }

    pub fn list_threads(&self, owner_id: &str) -> CoreResult<Vec<Thread>> {
        ThreadStore::new(&self.db)
            .list_for_owner(owner_id)
            .map_err(CoreError::Internal)
    }

    pub fn delete_thread(&self, thread_id: &str) -> CoreResult<()> {
        let threads = ThreadStore::new(&self.db);
        self.require_thread(thread_id)?;
        threads.delete(thread_id).map_err(CoreError::Internal)
    }

    pub fn list_thread_messages(&self, thread_id: &str) -> CoreResult<Vec<Message>> {
        self.require_thread(thread_id)?;
        MessageStore::new(&self.db)
            .list_for_thread(thread_id)
            .map_err(CoreError::Internal)
    }

    pub fn get_thread_snapshot(&self, thread_id: &str) -> CoreResult<ThreadSnapshot> {
        let thread = self.require_thread(thread_id)?;
        let recent_messages = MessageStore::new(&self.db)
            .list_for_thread(thread_id)
            .map_err(CoreError::Internal)?;
        let pending_actions = ApprovalStore::new(&self.db, &self.events)
            .list_pending()
            .map_err(CoreError::Internal)?
            .into_iter()
            .filter(|action| action.source_id == thread_id)
            .collect();
        let last_sequence = self
            .events
            .list(thread_id, 0, u32::MAX)
            .map_err(CoreError::Internal)?
            .last()
            .map(|event| event.sequence)
            .unwrap_or(0);
        Ok(ThreadSnapshot {
            thread,
            recent_messages,
            pending_actions,
            last_sequence,
        })
    }

    /// Start a new turn. Validates the
    /// thread exists, then runs the turn loop on a spawned task so the
    /// caller gets `turn_id` back immediately and observes progress via
    /// `watch_thread`.
    pub fn send_turn(self: &Arc<Self>, thread_id: &str, user_text: &str) -> CoreResult<String> {
        self.require_thread(thread_id)?;
        if user_text.trim().is_empty() {
            return Err(CoreError::InvalidArgument(
                "user_text must not be empty".into(),
            ));
        }

        let turn_id = Uuid::new_v4().to_string();
        let core = self.clone();
        let thread_id = thread_id.to_string();
        let user_text = user_text.to_string();
        let spawned_turn_id = turn_id.clone();
        tokio::spawn(async move {
            if let Err(err) = core
                .execute_turn(&thread_id, &user_text, &spawned_turn_id)
                .await
            {
                tracing::error!(
                    thread_id = %thread_id,
                    turn_id = %spawned_turn_id,
                    error = %err,
                    "turn execution failed"
                );
            }
        });
        Ok(turn_id)
    }

    /// Subscribe to a thread's live event stream.
    pub fn watch_thread(&self, thread_id: &str) -> CoreResult<Subscription> {
        self.require_thread(thread_id)?;
        Ok(self.events.subscribe(thread_id))
    }

    /// Replay events after `from_sequence`, for clients reconnecting to a
    /// stream.
    pub fn list_thread_events(
        &self,
        thread_id: &str,
        from_sequence: u64,
        limit: u32,
    ) -> CoreResult<Vec<ThreadEvent>> {
        self.require_thread(thread_id)?;
        self.events
            .list(thread_id, from_sequence, limit)
            .map_err(CoreError::Internal)
    }

    pub fn list_approvals(&self) -> CoreResult<Vec<ProposedAction>> {
        ApprovalStore::new(&self.db, &self.events)
            .list_pending()
            .map_err(CoreError::Internal)
    }

    pub fn approve_action(self: &Arc<Self>, action_id: &str) -> CoreResult<ProposedAction> {
        let store = ApprovalStore::new(&self.db, &self.events);
        let action = self.require_action(&store, action_id)?;
        match store.approve(action_id) {
            Ok(ApproveOutcome::Approved) => {}
            Ok(ApproveOutcome::ExpiredInstead) => {
                self.schedule_resumption(action.source_id.clone(), action.turn_id.clone());
                return Err(CoreError::FailedPrecondition(format!(
                    "action {action_id} had already expired"
                )));
            }
            Err(err) => return Err(map_approval_error(err)),
        }
        self.require_action(&store, action_id)
    }

    pub fn reject_action(self: &Arc<Self>, action_id: &str, reason: &str) -> CoreResult<ProposedAction> {
        let store = ApprovalStore::new(&self.db, &self.events);
        let action = self.require_action(&store, action_id)?;
        store.reject(action_id, reason).map_err(map_approval_error)?;
        self.schedule_resumption(action.source_id.clone(), action.turn_id.clone());
        self.require_action(&store, action_id)
    }

    pub fn list_audit(&self) -> CoreResult<Vec<AuditEntry>> {
        AuditStore::new(&self.db).list().map_err(CoreError::Internal)
    }

    fn require_thread(&self, thread_id: &str) -> CoreResult<Thread> {
        ThreadStore::new(&self.db)
            .get(thread_id)
            .map_err(CoreError::Internal)?
            .ok_or_else(|| CoreError::NotFound(format!("thread {thread_id}")))
    }

    fn require_action(&self, store: &ApprovalStore<'_>, action_id: &str) -> CoreResult<ProposedAction> {
        store
            .get(action_id)
            .map_err(CoreError::Internal)?
            .ok_or_else(|| CoreError::NotFound(format!("action {action_id}")))
    }
}

/// `ApprovalStore::approve`/`reject` surface precondition violations (wrong
/// status) as plain `anyhow::Error` text; map the ones the store documents
/// so `pincer-server` can return 409 instead of 500.
fn map_approval_error(err: anyhow::Error) -> CoreError {
    let message = err.to_string();
    if message.contains("failed_precondition") {
        CoreError::FailedPrecondition(message)
    } else {
        CoreError::Internal(err)
    }
}

#[cfg(test)]
mod tests {
    use crate::agent::HmacImageProxyRewriter;
    use crate::ai::EchoPlanner;
    use crate::tools::EchoToolExecutor;

    use super::*;

    fn core() -> Arc<PincerCore> {
        let image_proxy = Arc::new(HmacImageProxyRewriter::new(b"test-key".to_vec()));
        PincerCore::in_memory(Arc::new(EchoPlanner), Arc::new(EchoToolExecutor::new()), image_proxy).unwrap()
    }

    #[test]
    fn operations_on_an_unknown_thread_fail_not_found() {
        let core = core();
        assert!(matches!(
            core.list_thread_messages("nope"),
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            core.get_thread_snapshot("nope"),
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(core.delete_thread("nope"), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn list_threads_only_returns_the_requesting_owners_threads() {
        let core = core();
        let a = core.create_thread("owner-a").unwrap();
        core.create_thread("owner-b").unwrap();

        let owned = core.list_threads("owner-a").unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].thread_id, a.thread_id);
    }

    #[test]
    fn delete_thread_removes_it_from_subsequent_listings() {
        let core = core();
        let thread = core.create_thread("owner-a").unwrap();
        core.delete_thread(&thread.thread_id).unwrap();
        assert!(core.list_threads("owner-a").unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_turn_on_an_empty_message_fails_before_spawning_a_turn() {
        let core = core();
        let thread = core.create_thread("owner-a").unwrap();
        let result = core.send_turn(&thread.thread_id, "   ");
        assert!(matches!(result, Err(CoreError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn get_thread_snapshot_reflects_a_completed_turn() {
        let core = core();
        let thread = core.create_thread("owner-a").unwrap();
        let turn_id = uuid::Uuid::new_v4().to_string();
        core.execute_turn(&thread.thread_id, "hello", &turn_id)
            .await
            .unwrap();

        let snapshot = core.get_thread_snapshot(&thread.thread_id).unwrap();
        assert_eq!(snapshot.thread.thread_id, thread.thread_id);
        assert!(snapshot.pending_actions.is_empty());
        assert!(snapshot.last_sequence > 0);
        assert!(!snapshot.recent_messages.is_empty());
    }

    #[test]
    fn approving_an_unknown_action_fails_not_found() {
        let core = core();
        assert!(matches!(
            core.approve_action("nope"),
            Err(CoreError::NotFound(_))
        ));
    }
}
