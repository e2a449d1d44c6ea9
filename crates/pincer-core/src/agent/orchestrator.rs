//! The Turn Orchestrator. Component F — the bounded step
//! loop that turns one planner round into either a paused turn (something
//! needs approval) or a completed one.
//!
//! `execute_turn` starts a fresh turn; `execute_turn_from_step` resumes one
//! already in progress, picking up the shared `MAX_STEPS` budget where a
//! prior round left off. Both funnel into `run_steps`.

use chrono::Utc;
use uuid::Uuid;

use crate::ai::{Content, ModelMessage, PlanRequest, PlannerError, PlannerOutput, Role};
use crate::domain::{
    ActionSource, ActionStatus, ContentTrust, EventPayload, EventSource, Message, MessageRole,
    PolicyDecision, ProposedAction, RiskClass,
};
use crate::storage::{approvals, messages, DomainGrantStore, MessageStore, ThreadStore};

use super::core::PincerCore;
use super::splitter::{PlannedCall, PolicySplitter, SplitOutput};

/// One planner round's classified output, threaded between `plan_round` and
/// its caller.
struct PlannerRound {
    output: PlannerOutput,
    split: SplitOutput,
}

/// Tool names the Core trusts to be read-only. Authoritative — unlike the
/// planner's own `risk_class` hint (`ai::types::AiToolCall::risk_class`),
/// this never trusts untrusted model output; any tool absent from this list
/// is treated as `High` risk and routed to approval regardless of what the
/// planner claims about it.
fn classify_tool_risk(tool: &str) -> RiskClass {
    const KNOWN_READS: &[&str] = &[
        "echo",
        "web_fetch",
        "fetch_url",
        "http_get",
        "read_file",
        "list_dir",
        "search",
    ];
    if KNOWN_READS.contains(&tool) {
        RiskClass::Read
    } else {
        RiskClass::High
    }
}

impl PincerCore {
    /// Begin a new turn: persist the user's message, title the thread on
    /// its first turn, emit `TurnStarted`, then run the step loop from
    /// step 0.
    pub async fn execute_turn(
        &self,
        thread_id: &str,
        user_text: &str,
        turn_id: &str,
    ) -> anyhow::Result<()> {
        if user_text.trim().is_empty() {
            self.events.append(
                thread_id,
                Some(turn_id),
                None,
                EventSource::System,
                ContentTrust::TrustedSystem,
                EventPayload::TurnFailed {
                    code: "invalid_argument".to_string(),
                    retryable: false,
                    detail: "user_text must not be empty".to_string(),
                },
            )?;
            return Ok(());
        }

        let threads = ThreadStore::new(&self.db);
        let message_store = MessageStore::new(&self.db);

        message_store.insert(thread_id, MessageRole::User, user_text)?;
        threads.set_title_if_absent(thread_id, &crate::domain::derive_title(user_text))?;
        threads.touch(thread_id)?;

        self.events.append(
            thread_id,
            Some(turn_id),
            None,
            EventSource::System,
            ContentTrust::TrustedSystem,
            EventPayload::TurnStarted,
        )?;

        self.run_steps(thread_id, turn_id, user_text, 0).await
    }

    /// Resume a turn at `start_step`, the shared budget picked up from
    /// where the prior round paused. `user_text` is the
    /// text that originally started the turn, recovered by the Resumption
    /// Controller via `MessageStore::latest_user_message_before`.
    pub async fn execute_turn_from_step(
        &self,
        thread_id: &str,
        turn_id: &str,
        user_text: &str,
        start_step: u32,
        is_continuation: bool,
    ) -> anyhow::Result<()> {
        if is_continuation {
            self.events.append(
                thread_id,
                Some(turn_id),
                None,
                EventSource::System,
                ContentTrust::TrustedSystem,
                EventPayload::TurnResumed {
                    steps_remaining: self.config.max_steps.saturating_sub(start_step),
                },
            )?;
        }
        self.run_steps(thread_id, turn_id, user_text, start_step).await
    }

    async fn run_steps(
        &self,
        thread_id: &str,
        turn_id: &str,
        user_text: &str,
        start_step: u32,
    ) -> anyhow::Result<()> {
        let max_steps = self.config.max_steps;
        let message_store = MessageStore::new(&self.db);
        let mut step = start_step;

        while step < max_steps {
            let round = match self.plan_round(thread_id, turn_id, user_text, step, max_steps).await? {
                Some(round) => round,
                None => return Ok(()), // planner failure already emitted TurnFailed
            };

            // No inline reads to run this round means the turn is done being
            // driven forward — finalize immediately, whether
            // `approval_required` is empty (-> TurnCompleted) or not
            // (-> TurnPaused). Only when there ARE inline reads to run does
            // the loop proceed to run them and possibly continue.
            if round.split.inline_reads.is_empty() {
                return self
                    .finalize_turn(thread_id, turn_id, step, &round.output, &round.split.approval_required)
                    .await;
            }

            if let Some(thinking) = &round.output.thinking {
                if !thinking.is_empty() {
                    self.events.append(
                        thread_id,
                        Some(turn_id),
                        None,
                        EventSource::Model,
                        ContentTrust::UntrustedModel,
                        EventPayload::AssistantThinkingDelta {
                            delta: thinking.clone(),
                        },
                    )?;
                }
            }

            if !round.split.inline_reads.is_empty() {
                let runner = super::inline_runner::InlineToolRunner::new(
                    &self.events,
                    &message_store,
                    self.tool_executor.as_ref(),
                );
                runner.run(thread_id, turn_id, &round.split.inline_reads).await?;
            }

            if !round.split.approval_required.is_empty() {
                return self
                    .finalize_turn(thread_id, turn_id, step, &round.output, &round.split.approval_required)
                    .await;
            }

            step += 1;
        }

        // Budget exhausted without the loop ever pausing or failing: one
        // final planner call whose non-read calls (if any) gate the turn;
        // any inline reads it proposes are abandoned rather than executed,
        // since there is no further step to observe their result in.
        let round = match self.plan_round(thread_id, turn_id, user_text, max_steps, max_steps).await? {
            Some(round) => round,
            None => return Ok(()),
        };
        self.finalize_turn(
            thread_id,
            turn_id,
            max_steps.saturating_sub(1),
            &round.output,
            &round.split.approval_required,
        )
        .await
    }

    /// Run one planner round: call the planner, assign fresh `tool_call_id`s,
    /// classify and split the proposed calls, and emit `ToolCallPlanned` for
    /// each in split order. Returns `None` if the
    /// planner failed and `TurnFailed` has already been emitted — the caller
    /// should stop, not fall through to finalization.
    async fn plan_round(
        &self,
        thread_id: &str,
        turn_id: &str,
        user_text: &str,
        step: u32,
        max_steps: u32,
    ) -> anyhow::Result<Option<PlannerRound>> {
        let message_store = MessageStore::new(&self.db);
        let history = to_model_messages(&message_store.planner_history(thread_id)?);
        let request = PlanRequest {
            thread_id: thread_id.to_string(),
            user_text: user_text.to_string(),
            history,
            step,
            max_steps,
        };

        let output = match self.planner.plan(request).await {
            Ok(output) => output,
            Err(err) => {
                let detail = match err {
                    PlannerError::Invalid(detail) => detail,
                    PlannerError::Failed(detail) => detail,
                };
                self.events.append(
                    thread_id,
                    Some(turn_id),
                    None,
                    EventSource::System,
                    ContentTrust::TrustedSystem,
                    EventPayload::TurnFailed {
                        code: "failed_model_output".to_string(),
                        retryable: true,
                        detail,
                    },
                )?;
                return Ok(None);
            }
        };

        let calls: Vec<(String, String, serde_json::Value, RiskClass)> = output
            .tool_calls
            .iter()
            .map(|call| {
                (
                    Uuid::new_v4().to_string(),
                    call.tool.clone(),
                    call.arguments.clone(),
                    classify_tool_risk(&call.tool),
                )
            })
            .collect();

        let domain_grants = DomainGrantStore::new(&self.db);
        let splitter = PolicySplitter::new(&domain_grants);
        let (split, classified) = splitter.split(thread_id, calls)?;

        for entry in &classified {
            self.events.append(
                thread_id,
                Some(turn_id),
                None,
                EventSource::Policy,
                ContentTrust::TrustedSystem,
                EventPayload::ToolCallPlanned {
                    tool_call_id: entry.call.tool_call_id.clone(),
                    tool: entry.call.tool.clone(),
                    risk_class: entry.call.risk_class,
                },
            )?;
        }

        Ok(Some(PlannerRound { output, split }))
    }

    /// Finalize a round: rewrite and persist the assistant message, insert
    /// any proposed actions transactionally, then emit the post-commit
    /// event sequence ending in `TurnPaused` or `TurnCompleted`.
    async fn finalize_turn(
        &self,
        thread_id: &str,
        turn_id: &str,
        step: u32,
        output: &PlannerOutput,
        approval_required: &[PlannedCall],
    ) -> anyhow::Result<()> {
        let threads = ThreadStore::new(&self.db);
        let thread = threads
            .get(thread_id)?
            .ok_or_else(|| anyhow::anyhow!("thread not found: {thread_id}"))?;

        let rewritten = self.image_proxy.rewrite(&output.assistant_message);
        let now = Utc::now();

        let mut proposals: Vec<ProposedAction> = Vec::with_capacity(approval_required.len());
        let assistant_message: Message;
        {
            let mut conn = self.db.conn();
            let tx = conn.transaction()?;

            assistant_message = messages::insert_tx(&tx, thread_id, MessageRole::Assistant, &rewritten)?;

            for call in approval_required {
                let action = ProposedAction {
                    action_id: Uuid::new_v4().to_string(),
                    owner_id: thread.owner_id.clone(),
                    source: ActionSource::Chat,
                    source_id: thread_id.to_string(),
                    tool: call.tool.clone(),
                    args: call.args.clone(),
                    risk_class: call.risk_class,
                    justification: call.justification.clone(),
                    idempotency_key: Uuid::new_v4().to_string(),
                    status: ActionStatus::Pending,
                    rejection_reason: None,
                    expires_at: now + chrono::Duration::seconds(self.config.approval_ttl_secs),
                    created_at: now,
                    turn_id: turn_id.to_string(),
                };
                approvals::insert_proposed_tx(&tx, &action)?;
                proposals.push(action);
            }

            tx.commit()?;
        }
        threads.touch(thread_id)?;

        self.events.append(
            thread_id,
            Some(turn_id),
            None,
            EventSource::Model,
            ContentTrust::UntrustedModel,
            EventPayload::AssistantTextDelta {
                delta: rewritten.clone(),
            },
        )?;
        self.events.append(
            thread_id,
            Some(turn_id),
            None,
            EventSource::System,
            ContentTrust::TrustedSystem,
            EventPayload::AssistantMessageCommitted {
                message_id: assistant_message.message_id.clone(),
            },
        )?;

        for (call, action) in approval_required.iter().zip(proposals.iter()) {
            self.events.append(
                thread_id,
                Some(turn_id),
                None,
                EventSource::Policy,
                ContentTrust::TrustedSystem,
                EventPayload::PolicyDecisionMade {
                    tool_call_id: call.tool_call_id.clone(),
                    decision: PolicyDecision::RequireApproval,
                },
            )?;
            self.events.append(
                thread_id,
                Some(turn_id),
                None,
                EventSource::System,
                ContentTrust::TrustedSystem,
                EventPayload::ProposedActionCreated {
                    action_id: action.action_id.clone(),
                },
            )?;
        }

        if proposals.is_empty() {
            self.events.append(
                thread_id,
                Some(turn_id),
                None,
                EventSource::System,
                ContentTrust::TrustedSystem,
                EventPayload::TurnCompleted {
                    assistant_message_id: assistant_message.message_id,
                },
            )?;
        } else {
            let steps_used = step + 1;
            self.events.append(
                thread_id,
                Some(turn_id),
                None,
                EventSource::System,
                ContentTrust::TrustedSystem,
                EventPayload::TurnPaused {
                    pending_count: proposals.len(),
                    steps_used,
                    steps_remaining: self.config.max_steps.saturating_sub(steps_used),
                },
            )?;
        }

        Ok(())
    }
}

/// Translate persisted domain messages into planner wire messages. Internal
/// `[tool_call:...]`/`[tool_result:...]` markers surface to the planner as
/// `tool`-role turns so a round's tool activity stays visible in the next
/// round's history; `system` is already excluded by
/// `MessageStore::planner_history`.
fn to_model_messages(messages: &[Message]) -> Vec<ModelMessage> {
    messages
        .iter()
        .map(|message| {
            let role = match message.role {
                MessageRole::User => Role::User,
                MessageRole::Assistant => Role::Assistant,
                MessageRole::Internal => Role::Tool,
                MessageRole::System => Role::User, // filtered out upstream
            };
            ModelMessage {
                role,
                content: vec![Content::Text {
                    text: message.content.clone(),
                }],
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::agent::HmacImageProxyRewriter;
    use crate::ai::{AiToolCall, PlanRequest, Planner, PlannerError, PlannerOutput};
    use crate::config::DEFAULT_MAX_STEPS;
    use crate::domain::{ActionStatus, EventPayload};
    use crate::storage::ApprovalStore;
    use crate::tools::EchoToolExecutor;

    use super::PincerCore;

    /// Proposes a non-read `run_bash` call on its first round, then a plain
    /// answer with no further calls — drives the pause-then-resume path
    ///.
    struct PausesOnceThenAnswersPlanner {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Planner for PausesOnceThenAnswersPlanner {
        async fn plan(&self, _request: PlanRequest) -> Result<PlannerOutput, PlannerError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(PlannerOutput {
                    assistant_message: "about to run a command".into(),
                    thinking: None,
                    tool_calls: vec![AiToolCall {
                        id: "call-1".into(),
                        tool: "run_bash".into(),
                        arguments: json!({"cmd": "pwd"}),
                        risk_class: None,
                    }],
                })
            } else {
                Ok(PlannerOutput {
                    assistant_message: "done".into(),
                    thinking: None,
                    tool_calls: Vec::new(),
                })
            }
        }
    }

    /// Always proposes an inline read, never a non-read call — drives the
    /// turn to its step budget without ever pausing.
    struct AlwaysReadsPlanner;

    #[async_trait]
    impl Planner for AlwaysReadsPlanner {
        async fn plan(&self, _request: PlanRequest) -> Result<PlannerOutput, PlannerError> {
            Ok(PlannerOutput {
                assistant_message: "still working".into(),
                thinking: None,
                tool_calls: vec![AiToolCall {
                    id: "call-read".into(),
                    tool: "echo".into(),
                    arguments: json!({"text": "hi"}),
                    risk_class: None,
                }],
            })
        }
    }

    fn core_with(planner: Arc<dyn Planner>) -> Arc<PincerCore> {
        let image_proxy = Arc::new(HmacImageProxyRewriter::new(b"test-key".to_vec()));
        PincerCore::in_memory(planner, Arc::new(EchoToolExecutor::new()), image_proxy).unwrap()
    }

    #[tokio::test]
    async fn non_read_tool_call_pauses_the_turn() {
        let core = core_with(Arc::new(PausesOnceThenAnswersPlanner {
            calls: AtomicU32::new(0),
        }));
        let thread = core.create_thread("owner-1").unwrap();
        let turn_id = uuid::Uuid::new_v4().to_string();

        core.execute_turn(&thread.thread_id, "please run pwd", &turn_id)
            .await
            .unwrap();

        let events = core.list_thread_events(&thread.thread_id, 0, 100).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e.payload, EventPayload::TurnPaused { .. })));
        assert!(!events
            .iter()
            .any(|e| matches!(e.payload, EventPayload::TurnCompleted { .. })));

        let approvals = ApprovalStore::new(&core.db, &core.events);
        let pending = approvals.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, ActionStatus::Pending);
        assert_eq!(pending[0].tool, "run_bash");
    }

    #[tokio::test]
    async fn approving_the_only_pending_action_resumes_the_turn_to_completion() {
        let core = core_with(Arc::new(PausesOnceThenAnswersPlanner {
            calls: AtomicU32::new(0),
        }));
        let thread = core.create_thread("owner-1").unwrap();
        let turn_id = uuid::Uuid::new_v4().to_string();
        core.execute_turn(&thread.thread_id, "please run pwd", &turn_id)
            .await
            .unwrap();

        let approvals = ApprovalStore::new(&core.db, &core.events);
        let action = approvals.list_pending().unwrap().into_iter().next().unwrap();
        approvals.approve(&action.action_id).unwrap();
        approvals.mark_executed(&action.action_id).unwrap();

        core.schedule_resumption(thread.thread_id.clone(), turn_id.clone());
        // `schedule_resumption` hands off to a spawned task; give it room to
        // run to completion before asserting on the event trail.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let events = core.list_thread_events(&thread.thread_id, 0, 100).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e.payload, EventPayload::TurnResumed { .. })));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e.payload, EventPayload::TurnCompleted { .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn budget_exhaustion_finalizes_exactly_once_with_no_further_rounds() {
        let core = core_with(Arc::new(AlwaysReadsPlanner));
        let thread = core.create_thread("owner-1").unwrap();
        let turn_id = uuid::Uuid::new_v4().to_string();

        core.execute_turn(&thread.thread_id, "keep reading", &turn_id)
            .await
            .unwrap();

        let events = core.list_thread_events(&thread.thread_id, 0, 1000).unwrap();
        let completed = events
            .iter()
            .filter(|e| matches!(e.payload, EventPayload::TurnCompleted { .. }))
            .count();
        assert_eq!(completed, 1, "budget exhaustion must finalize exactly once");
        assert!(!events
            .iter()
            .any(|e| matches!(e.payload, EventPayload::TurnPaused { .. })));

        // DEFAULT_MAX_STEPS normal rounds plus the one extra round run after
        // the budget is exhausted.
        let planned = events
            .iter()
            .filter(|e| matches!(e.payload, EventPayload::ToolCallPlanned { .. }))
            .count();
        assert_eq!(planned as u32, DEFAULT_MAX_STEPS + 1);
    }
}
