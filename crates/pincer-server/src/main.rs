//! Pincer Server binary.
//!
//! Wires the default local-development collaborators (`EchoPlanner`,
//! `EchoToolExecutor`) into `pincer_server::start_server`. A real
//! deployment swaps these for a model-backed `Planner` and a tool
//! executor wired to actual side effects; the Core itself is agnostic to
//! which it gets.

use std::sync::Arc;

use pincer_core::ai::EchoPlanner;
use pincer_core::tools::EchoToolExecutor;
use pincer_server::{start_server, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = ServerConfig::default();
    let planner = Arc::new(EchoPlanner);
    let tool_executor = Arc::new(EchoToolExecutor::new());

    start_server(config, planner, tool_executor).await
}
