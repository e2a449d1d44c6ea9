//! Environment-driven configuration: read once at startup, log the
//! resolved values, and fall back to sensible defaults rather than failing
//! when a variable is unset.

use std::path::PathBuf;

use crate::domain::DEFAULT_APPROVAL_TTL_SECS;

/// Shared budget across pause/resume for a single turn.
pub const DEFAULT_MAX_STEPS: u32 = 10;
/// Action Executor poll interval.
pub const DEFAULT_EXECUTOR_POLL_MS: u64 = 250;
/// Expiry/Scheduler Worker poll interval — reuses the Action Executor's
/// cadence since both are one-dedicated-periodic-worker style loops.
pub const DEFAULT_EXPIRY_POLL_MS: u64 = 250;
/// Retention pruner sweep interval. Much coarser than the executor/expiry
/// polls since retention windows are measured in days, not milliseconds.
pub const DEFAULT_RETENTION_SWEEP_SECS: u64 = 3600;

/// Retention defaults from spec.md §3 — peripheral to the Core's
/// orchestration logic but still part of its data model.
pub const DEFAULT_IDEMPOTENCY_RETENTION_DAYS: i64 = 90;
pub const DEFAULT_AUDIT_RETENTION_DAYS: i64 = 90;
pub const DEFAULT_MESSAGE_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub db_path: PathBuf,
    pub max_steps: u32,
    pub approval_ttl_secs: i64,
    pub executor_poll_ms: u64,
    pub expiry_poll_ms: u64,
    pub retention_sweep_secs: u64,
    pub idempotency_retention_days: i64,
    pub audit_retention_days: i64,
    pub message_retention_days: i64,
}

impl CoreConfig {
    /// Read from environment variables (`PINCER_*`), falling back to
    /// `dirs`-resolved defaults when unset.
    pub fn from_env() -> Self {
        let db_path = std::env::var("PINCER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_db_path());

        let max_steps = std::env::var("PINCER_MAX_STEPS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_STEPS);

        let approval_ttl_secs = std::env::var("PINCER_APPROVAL_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_APPROVAL_TTL_SECS);

        let executor_poll_ms = std::env::var("PINCER_EXECUTOR_POLL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_EXECUTOR_POLL_MS);

        let expiry_poll_ms = std::env::var("PINCER_EXPIRY_POLL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_EXPIRY_POLL_MS);

        let retention_sweep_secs = std::env::var("PINCER_RETENTION_SWEEP_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RETENTION_SWEEP_SECS);

        let idempotency_retention_days = std::env::var("PINCER_IDEMPOTENCY_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_IDEMPOTENCY_RETENTION_DAYS);

        let audit_retention_days = std::env::var("PINCER_AUDIT_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_AUDIT_RETENTION_DAYS);

        let message_retention_days = std::env::var("PINCER_MESSAGE_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MESSAGE_RETENTION_DAYS);

        Self {
            db_path,
            max_steps,
            approval_ttl_secs,
            executor_poll_ms,
            expiry_poll_ms,
            retention_sweep_secs,
            idempotency_retention_days,
            audit_retention_days,
            message_retention_days,
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_steps: DEFAULT_MAX_STEPS,
            approval_ttl_secs: DEFAULT_APPROVAL_TTL_SECS,
            executor_poll_ms: DEFAULT_EXECUTOR_POLL_MS,
            expiry_poll_ms: DEFAULT_EXPIRY_POLL_MS,
            retention_sweep_secs: DEFAULT_RETENTION_SWEEP_SECS,
            idempotency_retention_days: DEFAULT_IDEMPOTENCY_RETENTION_DAYS,
            audit_retention_days: DEFAULT_AUDIT_RETENTION_DAYS,
            message_retention_days: DEFAULT_MESSAGE_RETENTION_DAYS,
        }
    }
}

/// Default database location under the user's data directory, used when
/// `PINCER_DB_PATH` is unset.
fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pincer")
        .join("pincer.db")
}
