//! The Action Executor. Component E.
//!
//! Runs as a standalone polling loop, independent of the Expiry Worker
//! (`expiry.rs`) — the two are split into separate tasks rather than one
//! poll doing both jobs. Each approved action goes through
//! three phases: a preflight transaction (idempotency check), a
//! side-effect phase with no open transaction (the actual tool call), and
//! a finalize transaction (status CAS plus bookkeeping), then hands off to
//! the Resumption Controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::{
    ActionSource, ContentTrust, EventPayload, EventSource, MessageRole, ProposedAction, ToolStream,
};
use crate::storage::{domain_grants, idempotency, ApprovalStore, MessageStore};
use crate::tools::truncation::truncate_tail;
use crate::tools::{OutputChunk, ToolStreamKind};

use super::core::PincerCore;

/// Up to this many approved actions are picked up per poll.
const BATCH_SIZE: u32 = 16;

const TOOL_RESULT_MESSAGE_CAP_LINES: usize = 1000;
const TOOL_RESULT_MESSAGE_CAP_BYTES: usize = 8 * 1024;

const URL_FETCH_TOOLS: &[&str] = &["web_fetch", "fetch_url", "http_get"];

/// Runs until `cancel` fires. Spawned once per process alongside
/// `expiry::run_expiry_worker`.
pub async fn run_action_executor(core: Arc<PincerCore>, poll: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(poll);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        let approvals = ApprovalStore::new(&core.db, &core.events);
        let approved = match approvals.list_approved(BATCH_SIZE) {
            Ok(actions) => actions,
            Err(err) => {
                tracing::error!(error = %err, "failed to list approved actions");
                continue;
            }
        };

        for action in approved {
            if let Err(err) = core.execute_approved_action(&action).await {
                tracing::error!(
                    action_id = %action.action_id,
                    error = %err,
                    "approved action execution failed"
                );
            }
        }
    }
}

impl PincerCore {
    async fn execute_approved_action(self: &Arc<Self>, action: &ProposedAction) -> anyhow::Result<()> {
        let args_hash = idempotency::hash_args(&action.args);

        // Preflight: bind (owner, tool, key) -> args_hash, or
        // detect a replay under the same key with different arguments.
        let conflict = {
            let conn = self.db.conn();
            match idempotency::lookup(&conn, &action.owner_id, &action.tool, &action.idempotency_key)? {
                Some(existing) => existing.args_hash != args_hash,
                None => {
                    idempotency::insert(
                        &conn,
                        &action.owner_id,
                        &action.tool,
                        &action.idempotency_key,
                        &args_hash,
                        &idempotency::hash_executed(&action.action_id),
                    )?;
                    false
                }
            }
        };

        let approvals = ApprovalStore::new(&self.db, &self.events);
        if conflict {
            approvals.reject_for_idempotency_conflict(&action.action_id)?;
            self.schedule_resumption(action.source_id.clone(), action.turn_id.clone());
            return Ok(());
        }

        // Side effect: no transaction held across this phase.
        let thread_id = action.source_id.clone();
        self.events.append(
            &thread_id,
            Some(&action.turn_id),
            None,
            EventSource::Tool,
            ContentTrust::TrustedSystem,
            EventPayload::ToolExecutionStarted {
                tool_call_id: action.action_id.clone(),
                tool: action.tool.clone(),
            },
        )?;

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<OutputChunk>();
        let mut stdout_offset = 0u64;
        let mut stderr_offset = 0u64;
        let forward_events = self.events.clone();
        let forward_thread_id = thread_id.clone();
        let forward_turn_id = action.turn_id.clone();
        let forward_action_id = action.action_id.clone();
        let forwarder = async move {
            while let Some(chunk) = chunk_rx.recv().await {
                let (stream, offset) = match chunk.stream {
                    ToolStreamKind::Stdout => (ToolStream::Stdout, &mut stdout_offset),
                    ToolStreamKind::Stderr => (ToolStream::Stderr, &mut stderr_offset),
                };
                let offset_bytes = *offset;
                *offset += chunk.data.len() as u64;
                let _ = forward_events.append(
                    &forward_thread_id,
                    Some(&forward_turn_id),
                    None,
                    EventSource::Tool,
                    ContentTrust::TrustedSystem,
                    EventPayload::ToolExecutionOutputDelta {
                        tool_call_id: forward_action_id.clone(),
                        stream,
                        offset_bytes,
                        delta: chunk.data,
                    },
                );
            }
        };

        let start = Instant::now();
        let (outcome, _) = tokio::join!(
            self.tool_executor.execute(&action.tool, &action.args, chunk_tx),
            forwarder
        );

        let (output, exit_code, timed_out, truncated) = match &outcome {
            Ok(result) => (
                result.output.clone(),
                result.exit_code,
                result.timed_out,
                result.truncated,
            ),
            Err(err) => (format!("tool execution failed: {err}"), None, false, false),
        };

        self.events.append(
            &thread_id,
            Some(&action.turn_id),
            None,
            EventSource::Tool,
            ContentTrust::TrustedSystem,
            EventPayload::ToolExecutionFinished {
                tool_call_id: action.action_id.clone(),
                exit_code,
                duration_ms: start.elapsed().as_millis() as u64,
                timed_out,
                truncated,
            },
        )?;

        if is_url_fetch(&action.tool) {
            if let Some(domain) = extract_domain(&action.args) {
                let conn = self.db.conn();
                domain_grants::grant(&conn, &domain, &thread_id)?;
            }
        }

        // Finalize: CAS approved -> executed, record
        // user-visible output, hand off to resumption.
        approvals.mark_executed(&action.action_id)?;

        if action.source == ActionSource::Chat {
            let message_store = MessageStore::new(&self.db);
            message_store.insert(
                &thread_id,
                MessageRole::System,
                &format!("Ran '{}'.", action.tool),
            )?;
            let capped = truncate_tail(&output, TOOL_RESULT_MESSAGE_CAP_LINES, TOOL_RESULT_MESSAGE_CAP_BYTES);
            let mut result_text = capped.text;
            if let Some(notice) = capped.notice() {
                result_text.push_str(&notice);
            }
            message_store.insert(
                &thread_id,
                MessageRole::Internal,
                &format!("[tool_result:{}] {}", action.tool, result_text),
            )?;
        }

        if outcome.is_err() {
            tracing::warn!(
                action_id = %action.action_id,
                tool = %action.tool,
                "approved action's tool execution failed"
            );
        }

        self.schedule_resumption(thread_id, action.turn_id.clone());
        Ok(())
    }
}

fn is_url_fetch(tool: &str) -> bool {
    URL_FETCH_TOOLS.contains(&tool)
}

fn extract_domain(args: &serde_json::Value) -> Option<String> {
    let url_str = args.get("url").and_then(serde_json::Value::as_str)?;
    url::Url::parse(url_str).ok()?.host_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::agent::HmacImageProxyRewriter;
    use crate::ai::{PlanRequest, Planner, PlannerError, PlannerOutput};
    use crate::domain::{ActionSource, ActionStatus, EventPayload, ProposedAction, RiskClass};
    use crate::storage::approvals::insert_proposed_tx;
    use crate::storage::ApprovalStore;
    use crate::tools::EchoToolExecutor;

    use super::PincerCore;

    /// Never called by these tests — the Action Executor acts on rows
    /// inserted directly, bypassing the Turn Orchestrator.
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

    fn approved_action(thread_id: &str, turn_id: &str, tool: &str, idempotency_key: &str) -> ProposedAction {
        let now = chrono::Utc::now();
        ProposedAction {
            action_id: uuid::Uuid::new_v4().to_string(),
            owner_id: "owner-1".into(),
            source: ActionSource::Chat,
            source_id: thread_id.into(),
            tool: tool.into(),
            args: json!({ "text": "hi" }),
            risk_class: RiskClass::Write,
            justification: "test".into(),
            idempotency_key: idempotency_key.into(),
            status: ActionStatus::Approved,
            rejection_reason: None,
            expires_at: now + chrono::Duration::hours(24),
            created_at: now,
            turn_id: turn_id.into(),
        }
    }

    #[tokio::test]
    async fn executing_an_approved_action_marks_it_executed_and_records_audit() {
        let core = core();
        let thread = core.create_thread("owner-1").unwrap();
        let turn_id = uuid::Uuid::new_v4().to_string();
        let action = approved_action(&thread.thread_id, &turn_id, "echo", "key-1");
        insert_proposed_tx(&core.db.conn(), &action).unwrap();

        core.execute_approved_action(&action).await.unwrap();

        let approvals = ApprovalStore::new(&core.db, &core.events);
        let reloaded = approvals.get(&action.action_id).unwrap().unwrap();
        assert_eq!(reloaded.status, ActionStatus::Executed);

        let record = crate::storage::idempotency::lookup(&core.db.conn(), "owner-1", "echo", "key-1")
            .unwrap()
            .unwrap();
        assert_eq!(
            record.result_hash,
            crate::storage::idempotency::hash_executed(&action.action_id)
        );
        assert!(!record.result_hash.is_empty());

        let events = core.list_thread_events(&thread.thread_id, 0, 100).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e.payload, EventPayload::ToolExecutionStarted { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e.payload, EventPayload::ToolExecutionFinished { .. })));

        let audit = core.list_audit().unwrap();
        assert_eq!(
            audit
                .iter()
                .filter(|e| e.event_type == crate::domain::AuditEventType::ActionExecuted)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn second_approved_action_with_same_key_but_different_args_is_an_idempotency_conflict() {
        let core = core();
        let thread = core.create_thread("owner-1").unwrap();
        let turn_id = uuid::Uuid::new_v4().to_string();

        let first = approved_action(&thread.thread_id, &turn_id, "echo", "shared-key");
        insert_proposed_tx(&core.db.conn(), &first).unwrap();
        core.execute_approved_action(&first).await.unwrap();

        let mut second = approved_action(&thread.thread_id, &turn_id, "echo", "shared-key");
        second.args = json!({ "text": "different" });
        insert_proposed_tx(&core.db.conn(), &second).unwrap();
        core.execute_approved_action(&second).await.unwrap();

        let approvals = ApprovalStore::new(&core.db, &core.events);
        let first_reloaded = approvals.get(&first.action_id).unwrap().unwrap();
        let second_reloaded = approvals.get(&second.action_id).unwrap().unwrap();
        assert_eq!(first_reloaded.status, ActionStatus::Executed);
        assert_eq!(second_reloaded.status, ActionStatus::Rejected);
        assert_eq!(
            second_reloaded.rejection_reason.as_deref(),
            Some("idempotency_conflict")
        );

        let audit = core.list_audit().unwrap();
        assert_eq!(
            audit
                .iter()
                .filter(|e| e.event_type == crate::domain::AuditEventType::IdempotencyConflict)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn chat_sourced_action_records_a_system_message_and_internal_tool_result() {
        let core = core();
        let thread = core.create_thread("owner-1").unwrap();
        let turn_id = uuid::Uuid::new_v4().to_string();
        let action = approved_action(&thread.thread_id, &turn_id, "echo", "key-msg");
        insert_proposed_tx(&core.db.conn(), &action).unwrap();

        core.execute_approved_action(&action).await.unwrap();

        let messages = core.list_thread_messages(&thread.thread_id).unwrap();
        assert!(messages
            .iter()
            .any(|m| m.role == crate::domain::MessageRole::System && m.content.contains("echo")));
        assert!(messages.iter().any(|m| m.content.starts_with("[tool_result:echo]")));
    }
}
