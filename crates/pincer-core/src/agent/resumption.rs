//! The Resumption Controller. Component G.
//!
//! Invoked whenever a proposed action tied to a paused turn settles
//! (approved and executed, rejected, expired, or hit an idempotency
//! conflict). Resumes the turn once every proposal for it has left
//! `pending`, picking up the shared step budget where the turn paused.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::{ContentTrust, EventPayload, EventSource, MessageRole};
use crate::storage::{ApprovalStore, MessageStore};

use super::core::PincerCore;

impl PincerCore {
    /// Schedule a resumption attempt for `turn_id` on `thread_id` and
    /// return immediately — the actual work runs on a spawned task so the
    /// caller (an approve/reject RPC, or the Action Executor's finalize
    /// phase) never blocks on it. A no-op for non-chat
    /// sources or an empty `turn_id`.
    pub fn schedule_resumption(self: &Arc<Self>, thread_id: String, turn_id: String) {
        if turn_id.is_empty() {
            return;
        }
        let core = self.clone();
        tokio::spawn(async move {
            if let Err(err) = core.try_resume(&thread_id, &turn_id).await {
                tracing::warn!(
                    thread_id = %thread_id,
                    turn_id = %turn_id,
                    error = %err,
                    "resumption attempt failed"
                );
            }
        });
    }

    async fn try_resume(&self, thread_id: &str, turn_id: &str) -> anyhow::Result<()> {
        let approvals = ApprovalStore::new(&self.db, &self.events);
        if approvals.count_pending_for_turn(turn_id)? > 0 {
            return Ok(());
        }

        // Test-and-set: only one in-flight resumption per turn at a time
        //.
        if self
            .resumption_guard
            .insert(turn_id.to_string(), ())
            .is_some()
        {
            return Ok(());
        }
        let result = self.resume_locked(thread_id, turn_id).await;
        self.resumption_guard.remove(turn_id);
        result
    }

    async fn resume_locked(&self, thread_id: &str, turn_id: &str) -> anyhow::Result<()> {
        let message_store = MessageStore::new(&self.db);
        let approvals = ApprovalStore::new(&self.db, &self.events);

        // No dedicated "first event of this turn" index exists; scanning
        // the thread's event log for the earliest event tagged with this
        // turn_id is the simplest correct way to recover it. steps_used is
        // reconstructed this way rather than tracked by a live counter.
        let turn_started_at = self
            .events
            .list(thread_id, 0, u32::MAX)?
            .into_iter()
            .find(|event| event.turn_id.as_deref() == Some(turn_id))
            .map(|event| event.occurred_at)
            .unwrap_or_else(Utc::now);

        let tool_call_steps =
            message_store.count_tool_call_markers_since(thread_id, turn_started_at)?;
        let proposal_steps = approvals.list_by_turn(turn_id)?.len() as u32;
        let steps_used = tool_call_steps + proposal_steps;

        if steps_used >= self.config.max_steps {
            let last_assistant_message_id = message_store
                .list_for_thread(thread_id)?
                .into_iter()
                .rev()
                .find(|message| message.role == MessageRole::Assistant)
                .map(|message| message.message_id)
                .unwrap_or_default();
            self.events.append(
                thread_id,
                Some(turn_id),
                None,
                EventSource::System,
                ContentTrust::TrustedSystem,
                EventPayload::TurnCompleted {
                    assistant_message_id: last_assistant_message_id,
                },
            )?;
            return Ok(());
        }

        let user_text = message_store
            .latest_user_message_before(thread_id, turn_started_at)?
            .map(|message| message.content)
            .unwrap_or_default();

        self.execute_turn_from_step(thread_id, turn_id, &user_text, steps_used, true)
            .await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use crate::agent::HmacImageProxyRewriter;
    use crate::ai::{AiToolCall, PlanRequest, Planner, PlannerError, PlannerOutput};
    use crate::domain::EventPayload;
    use crate::storage::ApprovalStore;
    use crate::tools::EchoToolExecutor;

    use super::PincerCore;

    /// Always proposes two distinct non-read calls, so a turn pauses with
    /// two pending proposals.
    struct TwoNonReadCallsPlanner;

    #[async_trait]
    impl Planner for TwoNonReadCallsPlanner {
        async fn plan(&self, _request: PlanRequest) -> Result<PlannerOutput, PlannerError> {
            Ok(PlannerOutput {
                assistant_message: "running two commands".into(),
                thinking: None,
                tool_calls: vec![
                    AiToolCall {
                        id: "call-1".into(),
                        tool: "run_bash".into(),
                        arguments: json!({"cmd": "pwd"}),
                        risk_class: None,
                    },
                    AiToolCall {
                        id: "call-2".into(),
                        tool: "write_file".into(),
                        arguments: json!({"path": "/tmp/x"}),
                        risk_class: None,
                    },
                ],
            })
        }
    }

    fn core_with(planner: std::sync::Arc<dyn Planner>) -> std::sync::Arc<PincerCore> {
        let image_proxy = std::sync::Arc::new(HmacImageProxyRewriter::new(b"test-key".to_vec()));
        PincerCore::in_memory(planner, std::sync::Arc::new(EchoToolExecutor::new()), image_proxy).unwrap()
    }

    #[tokio::test]
    async fn resuming_with_a_pending_sibling_proposal_is_a_no_op() {
        let core = core_with(std::sync::Arc::new(TwoNonReadCallsPlanner));
        let thread = core.create_thread("owner-1").unwrap();
        let turn_id = uuid::Uuid::new_v4().to_string();
        core.execute_turn(&thread.thread_id, "please run two things", &turn_id)
            .await
            .unwrap();

        let approvals = ApprovalStore::new(&core.db, &core.events);
        let pending = approvals.list_pending().unwrap();
        assert_eq!(pending.len(), 2);

        // Settle only one of the two pending proposals.
        approvals.approve(&pending[0].action_id).unwrap();
        approvals.mark_executed(&pending[0].action_id).unwrap();

        core.schedule_resumption(thread.thread_id.clone(), turn_id.clone());
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let events = core.list_thread_events(&thread.thread_id, 0, 100).unwrap();
        assert!(
            !events
                .iter()
                .any(|e| matches!(e.payload, EventPayload::TurnResumed { .. })),
            "resumption must wait for every pending proposal on the turn to settle"
        );
    }

    #[tokio::test]
    async fn scheduling_resumption_with_an_empty_turn_id_is_a_no_op() {
        let core = core_with(std::sync::Arc::new(TwoNonReadCallsPlanner));
        let thread = core.create_thread("owner-1").unwrap();
        core.schedule_resumption(thread.thread_id.clone(), String::new());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let events = core.list_thread_events(&thread.thread_id, 0, 100).unwrap();
        assert!(events.is_empty());
    }
}
