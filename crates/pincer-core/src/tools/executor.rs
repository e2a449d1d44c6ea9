//! The `ToolExecutor` capability: `Execute(tool, args,
//! emit(deltas…)) -> {output, exit_code, duration, timed_out, truncated}`.
//!
//! Concrete tool implementations (web fetch, shell execution, mail clients)
//! are specified only by contract here. `RegistryToolExecutor` is the
//! dynamic-dispatch shell the Core drives: tool execution is polymorphic
//! over this one capability, looked up by name in a map, not a closed
//! `match`. Unknown tools fail the single action with a reason string
//! rather than the turn. `EchoToolExecutor` is the illustrative read-only
//! implementation used by tests and local development.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;

/// Which logical stream an output chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStreamKind {
    Stdout,
    Stderr,
}

/// One chunk of streamed tool output.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub stream: ToolStreamKind,
    pub data: String,
}

/// Result of a completed tool execution.
#[derive(Debug, Clone)]
pub struct ToolExecutionOutcome {
    pub output: String,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub timed_out: bool,
    pub truncated: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolExecutorError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool execution failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        tool: &str,
        args: &Value,
        emit: mpsc::UnboundedSender<OutputChunk>,
    ) -> Result<ToolExecutionOutcome, ToolExecutorError>;
}

/// One tool's handler, registered by name.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn run(
        &self,
        args: &Value,
        emit: mpsc::UnboundedSender<OutputChunk>,
    ) -> Result<ToolExecutionOutcome, ToolExecutorError>;
}

/// Dynamic-dispatch executor keyed by tool name.
#[derive(Clone, Default)]
pub struct RegistryToolExecutor {
    handlers: Arc<DashMap<String, Arc<dyn ToolHandler>>>,
}

impl RegistryToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }
}

#[async_trait]
impl ToolExecutor for RegistryToolExecutor {
    async fn execute(
        &self,
        tool: &str,
        args: &Value,
        emit: mpsc::UnboundedSender<OutputChunk>,
    ) -> Result<ToolExecutionOutcome, ToolExecutorError> {
        let handler = self
            .handlers
            .get(tool)
            .map(|entry| entry.clone())
            .ok_or_else(|| ToolExecutorError::UnknownTool(tool.to_string()))?;
        handler.run(args, emit).await
    }
}

/// Minimal read-only executor used by tests and local development: returns
/// the `text` argument verbatim (or the whole args object if absent),
/// emitting it as a single stdout chunk.
#[derive(Default)]
pub struct EchoToolExecutor {
    latency: Option<Duration>,
}

impl EchoToolExecutor {
    pub fn new() -> Self {
        Self { latency: None }
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
        }
    }
}

#[async_trait]
impl ToolExecutor for EchoToolExecutor {
    async fn execute(
        &self,
        _tool: &str,
        args: &Value,
        emit: mpsc::UnboundedSender<OutputChunk>,
    ) -> Result<ToolExecutionOutcome, ToolExecutorError> {
        let start = Instant::now();
        if let Some(delay) = self.latency {
            tokio::time::sleep(delay).await;
        }
        let text = args
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| args.to_string());
        let _ = emit.send(OutputChunk {
            stream: ToolStreamKind::Stdout,
            data: text.clone(),
        });
        Ok(ToolExecutionOutcome {
            output: text,
            exit_code: Some(0),
            duration: start.elapsed(),
            timed_out: false,
            truncated: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_tool_fails_with_reason_string() {
        let executor = RegistryToolExecutor::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = executor
            .execute("does_not_exist", &Value::Null, tx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolExecutorError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn echo_tool_returns_text_argument() {
        let executor = EchoToolExecutor::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = executor
            .execute("echo", &serde_json::json!({ "text": "hello" }), tx)
            .await
            .unwrap();
        assert_eq!(outcome.output, "hello");
        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.data, "hello");
    }
}
