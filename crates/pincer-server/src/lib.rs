//! Pincer Server
//!
//! Self-hosted HTTP/SSE API server fronting a [`pincer_core::PincerCore`].
//! This is a library crate — the server is started via `start_server()`.
//! Route handlers are thin: every one of them is a direct call into a
//! [`pincer_core::agent::operations`] method, with no orchestration logic
//! of its own.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{http::Method, middleware, routing::get, Json, Router};
use pincer_core::ai::Planner;
use pincer_core::tools::ToolExecutor;
use pincer_core::agent::{
    run_action_executor, run_expiry_worker, run_retention_pruner, HmacImageProxyRewriter,
    ImageProxyRewriter,
};
use pincer_core::{CoreConfig, PincerCore};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod error;
pub mod routes;

/// Configuration for starting the server.
pub struct ServerConfig {
    /// Port to listen on (default: 3000).
    pub port: u16,
    pub core: CoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            core: CoreConfig::from_env(),
        }
    }
}

/// Shared application state. Every route handler reaches into `core` and
/// nothing else.
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<PincerCore>,
}

/// Build the Axum router, the `PincerCore`, and background workers
/// (Action Executor, Expiry Worker, retention pruner). Returns a
/// cancellation token the caller uses to stop the background workers on
/// shutdown.
pub async fn build_router(
    config: &ServerConfig,
    planner: Arc<dyn Planner>,
    tool_executor: Arc<dyn ToolExecutor>,
) -> anyhow::Result<(Router, AppState, CancellationToken)> {
    let proxy_key = std::env::var("PINCER_IMAGE_PROXY_KEY").unwrap_or_else(|_| "pincer-dev-key".into());
    let image_proxy: Arc<dyn ImageProxyRewriter> = Arc::new(HmacImageProxyRewriter::new(proxy_key.into_bytes()));
    let core = PincerCore::new(config.core.clone(), planner, tool_executor, image_proxy)?;

    let cancel = CancellationToken::new();
    tokio::spawn(run_action_executor(
        core.clone(),
        std::time::Duration::from_millis(config.core.executor_poll_ms),
        cancel.clone(),
    ));
    tokio::spawn(run_expiry_worker(
        core.clone(),
        std::time::Duration::from_millis(config.core.expiry_poll_ms),
        cancel.clone(),
    ));
    tokio::spawn(run_retention_pruner(
        core.clone(),
        std::time::Duration::from_secs(config.core.retention_sweep_secs),
        cancel.clone(),
    ));

    let state = AppState { core };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .nest(
            "/api",
            routes::api_router().layer(middleware::from_fn_with_state(
                state.clone(),
                auth::auth_middleware,
            )),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    Ok((app, state, cancel))
}

/// Start the Pincer server and block until shutdown.
pub async fn start_server(
    config: ServerConfig,
    planner: Arc<dyn Planner>,
    tool_executor: Arc<dyn ToolExecutor>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let (app, _state, cancel) = build_router(&config, planner, tool_executor).await?;

    tracing::info!("Pincer server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await;

    cancel.cancel();
    result?;
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}
