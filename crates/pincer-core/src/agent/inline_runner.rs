//! The Inline Tool Runner. Component D.
//!
//! Executes every call the Policy Splitter routed to `inline_reads`
//! concurrently within one planning round. Per-call event ordering is
//! preserved (`Started` -> `OutputDelta*` -> `Finished`); across calls,
//! interleaving is permitted. The caller awaits
//! [`InlineToolRunner::run`] in full before proceeding to the next step.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::mpsc;

use crate::domain::{ContentTrust, EventPayload, EventSource, MessageRole, ToolStream};
use crate::storage::{EventLog, MessageStore};
use crate::tools::truncation::truncate_tail;
use crate::tools::{OutputChunk, ToolExecutor, ToolStreamKind};

use super::splitter::PlannedCall;

/// Output is capped before being persisted as a `[tool_result:...]` internal
/// message so one chatty tool cannot blow out planner context on the next
/// round.
const TOOL_RESULT_MESSAGE_CAP_LINES: usize = 1000;
const TOOL_RESULT_MESSAGE_CAP_BYTES: usize = 8 * 1024;

pub struct InlineToolRunner<'a> {
    events: &'a EventLog,
    messages: &'a MessageStore<'a>,
    executor: &'a dyn ToolExecutor,
}

impl<'a> InlineToolRunner<'a> {
    pub fn new(
        events: &'a EventLog,
        messages: &'a MessageStore<'a>,
        executor: &'a dyn ToolExecutor,
    ) -> Self {
        Self {
            events,
            messages,
            executor,
        }
    }

    /// Run every inline-read call concurrently, waiting for all of them to
    /// finish before returning.
    pub async fn run(
        &self,
        thread_id: &str,
        turn_id: &str,
        calls: &[PlannedCall],
    ) -> anyhow::Result<()> {
        let futures = calls
            .iter()
            .map(|call| self.run_one(thread_id, turn_id, call));
        let results = join_all(futures).await;
        results.into_iter().collect::<anyhow::Result<Vec<()>>>()?;
        Ok(())
    }

    async fn run_one(
        &self,
        thread_id: &str,
        turn_id: &str,
        call: &PlannedCall,
    ) -> anyhow::Result<()> {
        self.events.append(
            thread_id,
            Some(turn_id),
            None,
            EventSource::Tool,
            ContentTrust::TrustedSystem,
            EventPayload::ToolExecutionStarted {
                tool_call_id: call.tool_call_id.clone(),
                tool: call.tool.clone(),
            },
        )?;

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<OutputChunk>();
        let stdout_offset = AtomicU64::new(0);
        let stderr_offset = AtomicU64::new(0);

        let forward_thread_id = thread_id.to_string();
        let forward_turn_id = turn_id.to_string();
        let forward_tool_call_id = call.tool_call_id.clone();
        let forwarder = async {
            while let Some(chunk) = chunk_rx.recv().await {
                let (stream, offset) = match chunk.stream {
                    ToolStreamKind::Stdout => (ToolStream::Stdout, &stdout_offset),
                    ToolStreamKind::Stderr => (ToolStream::Stderr, &stderr_offset),
                };
                let offset_bytes = offset.fetch_add(chunk.data.len() as u64, Ordering::SeqCst);
                let _ = self.events.append(
                    &forward_thread_id,
                    Some(&forward_turn_id),
                    None,
                    EventSource::Tool,
                    ContentTrust::TrustedSystem,
                    EventPayload::ToolExecutionOutputDelta {
                        tool_call_id: forward_tool_call_id.clone(),
                        stream,
                        offset_bytes,
                        delta: chunk.data,
                    },
                );
            }
        };

        let start = Instant::now();
        let (outcome, forwarder_result) =
            tokio::join!(self.executor.execute(&call.tool, &call.args, chunk_tx), forwarder);
        let _: () = forwarder_result;

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
            thread_id,
            Some(turn_id),
            None,
            EventSource::Tool,
            ContentTrust::TrustedSystem,
            EventPayload::ToolExecutionFinished {
                tool_call_id: call.tool_call_id.clone(),
                exit_code,
                duration_ms: start.elapsed().as_millis() as u64,
                timed_out,
                truncated,
            },
        )?;

        // Planner-visible history: recorded as two internal messages in
        // order so the next round's history shows call then result
        //.
        self.messages.insert(
            thread_id,
            MessageRole::Internal,
            &format!("[tool_call:{}] {}", call.tool, call.args),
        )?;
        let capped = truncate_tail(&output, TOOL_RESULT_MESSAGE_CAP_LINES, TOOL_RESULT_MESSAGE_CAP_BYTES);
        let mut result_text = capped.text;
        if let Some(notice) = capped.notice() {
            result_text.push_str(&notice);
        }
        self.messages.insert(
            thread_id,
            MessageRole::Internal,
            &format!("[tool_result:{}] {}", call.tool, result_text),
        )?;

        if let Err(err) = outcome {
            tracing::warn!(
                thread_id = %thread_id,
                turn_id = %turn_id,
                tool = %call.tool,
                error = %err,
                "inline tool call failed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::domain::{EventPayload, RiskClass, ToolStream};
    use crate::storage::{Database, EventLog, MessageStore, ThreadStore};
    use crate::tools::EchoToolExecutor;

    use super::{InlineToolRunner, PlannedCall};

    fn planned_call(id: &str, tool: &str, text: &str) -> PlannedCall {
        PlannedCall {
            tool_call_id: id.into(),
            tool: tool.into(),
            args: json!({ "text": text }),
            risk_class: RiskClass::Read,
            justification: String::new(),
        }
    }

    #[tokio::test]
    async fn one_call_emits_started_delta_finished_in_order() {
        let db = std::sync::Arc::new(Database::in_memory().unwrap());
        let thread = ThreadStore::new(&db).create("owner-1").unwrap();
        let events = EventLog::new(db.clone());
        let messages = MessageStore::new(&db);
        let executor = EchoToolExecutor::new();
        let runner = InlineToolRunner::new(&events, &messages, &executor);

        let call = planned_call("call-1", "echo", "hello");
        runner
            .run(&thread.thread_id, "turn-1", std::slice::from_ref(&call))
            .await
            .unwrap();

        let recorded = events.list(&thread.thread_id, 0, 100).unwrap();
        let kinds: Vec<&str> = recorded
            .iter()
            .map(|e| match &e.payload {
                EventPayload::ToolExecutionStarted { .. } => "started",
                EventPayload::ToolExecutionOutputDelta { .. } => "delta",
                EventPayload::ToolExecutionFinished { .. } => "finished",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["started", "delta", "finished"]);

        match &recorded[1].payload {
            EventPayload::ToolExecutionOutputDelta {
                stream,
                offset_bytes,
                delta,
                ..
            } => {
                assert_eq!(*stream, ToolStream::Stdout);
                assert_eq!(*offset_bytes, 0);
                assert_eq!(delta, "hello");
            }
            other => panic!("expected an output delta, got {other:?}"),
        }

        let history = messages.planner_history(&thread.thread_id).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].content.starts_with("[tool_call:echo]"));
        assert!(history[1].content.starts_with("[tool_result:echo]"));
    }

    #[tokio::test]
    async fn concurrent_calls_each_preserve_their_own_started_delta_finished_order() {
        let db = std::sync::Arc::new(Database::in_memory().unwrap());
        let thread = ThreadStore::new(&db).create("owner-1").unwrap();
        let events = EventLog::new(db.clone());
        let messages = MessageStore::new(&db);
        let executor = EchoToolExecutor::new();
        let runner = InlineToolRunner::new(&events, &messages, &executor);

        let calls = vec![
            planned_call("call-a", "echo", "a"),
            planned_call("call-b", "echo", "b"),
        ];
        runner.run(&thread.thread_id, "turn-1", &calls).await.unwrap();

        let recorded = events.list(&thread.thread_id, 0, 100).unwrap();
        for id in ["call-a", "call-b"] {
            let mut seen_started = false;
            let mut seen_finished = false;
            for event in &recorded {
                let matches_call = match &event.payload {
                    EventPayload::ToolExecutionStarted { tool_call_id, .. }
                    | EventPayload::ToolExecutionOutputDelta { tool_call_id, .. }
                    | EventPayload::ToolExecutionFinished { tool_call_id, .. } => {
                        tool_call_id == id
                    }
                    _ => false,
                };
                if !matches_call {
                    continue;
                }
                match &event.payload {
                    EventPayload::ToolExecutionStarted { .. } => {
                        assert!(!seen_started && !seen_finished);
                        seen_started = true;
                    }
                    EventPayload::ToolExecutionOutputDelta { .. } => {
                        assert!(seen_started && !seen_finished);
                    }
                    EventPayload::ToolExecutionFinished { .. } => {
                        assert!(seen_started);
                        seen_finished = true;
                    }
                    _ => {}
                }
            }
            assert!(seen_started && seen_finished, "call {id} missing lifecycle events");
        }

        // Two calls, two tool_call/tool_result message pairs.
        let history = messages.planner_history(&thread.thread_id).unwrap();
        assert_eq!(history.len(), 4);
    }
}
