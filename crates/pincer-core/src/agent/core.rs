//! `PincerCore`: the process-wide handle that owns the storage layer and
//! the capability implementations, and is the receiver for every Core
//! operation (Turn Orchestrator, Resumption Controller, Action Executor,
//! Expiry Worker, and the public API surface in [`super::operations`]).
//!
//! One struct's behavior is split across several files by topic: this
//! file for construction, `orchestrator.rs` for the turn loop,
//! `resumption.rs` for resumption, `operations.rs` for the public surface.

use std::sync::Arc;

use dashmap::DashMap;

use crate::ai::Planner;
use crate::config::CoreConfig;
use crate::storage::{Database, EventLog, SharedDatabase};
use crate::tools::ToolExecutor;

use super::image_proxy::ImageProxyRewriter;

pub struct PincerCore {
    pub(crate) db: SharedDatabase,
    pub(crate) events: Arc<EventLog>,
    pub(crate) planner: Arc<dyn Planner>,
    pub(crate) tool_executor: Arc<dyn ToolExecutor>,
    pub(crate) image_proxy: Arc<dyn ImageProxyRewriter>,
    pub(crate) config: CoreConfig,
    /// The resumption guard: a process-local set keyed by
    /// `turn_id`, test-and-set to prevent concurrent double-resumption.
    pub(crate) resumption_guard: Arc<DashMap<String, ()>>,
}

impl PincerCore {
    pub fn new(
        config: CoreConfig,
        planner: Arc<dyn Planner>,
        tool_executor: Arc<dyn ToolExecutor>,
        image_proxy: Arc<dyn ImageProxyRewriter>,
    ) -> anyhow::Result<Arc<Self>> {
        let db: SharedDatabase = Arc::new(Database::new(&config.db_path)?);
        let events = Arc::new(EventLog::new(db.clone()));
        Ok(Arc::new(Self {
            db,
            events,
            planner,
            tool_executor,
            image_proxy,
            config,
            resumption_guard: Arc::new(DashMap::new()),
        }))
    }

    #[cfg(test)]
    pub fn in_memory(
        planner: Arc<dyn Planner>,
        tool_executor: Arc<dyn ToolExecutor>,
        image_proxy: Arc<dyn ImageProxyRewriter>,
    ) -> anyhow::Result<Arc<Self>> {
        let db: SharedDatabase = Arc::new(Database::in_memory()?);
        let events = Arc::new(EventLog::new(db.clone()));
        Ok(Arc::new(Self {
            db,
            events,
            planner,
            tool_executor,
            image_proxy,
            config: CoreConfig::default(),
            resumption_guard: Arc::new(DashMap::new()),
        }))
    }
}
