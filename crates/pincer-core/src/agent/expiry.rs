//! The Expiry/Scheduler Worker. Component I.
//!
//! A dedicated periodic task, decoupled from the Action Executor's poll
//! loop, that autonomously rejects pending proposals past
//! their deadline and wakes the Resumption Controller for any turn that
//! may now be unblocked by it.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::storage::ApprovalStore;

use super::core::PincerCore;

pub async fn run_expiry_worker(core: Arc<PincerCore>, poll: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(poll);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        let approvals = ApprovalStore::new(&core.db, &core.events);
        let pending = match approvals.list_pending() {
            Ok(actions) => actions,
            Err(err) => {
                tracing::error!(error = %err, "failed to list pending actions for expiry sweep");
                continue;
            }
        };

        for action in pending {
            match approvals.expire_if_due(&action.action_id) {
                Ok(true) => {
                    core.schedule_resumption(action.source_id.clone(), action.turn_id.clone())
                }
                Ok(false) => {}
                Err(err) => tracing::error!(
                    action_id = %action.action_id,
                    error = %err,
                    "failed to expire pending action"
                ),
            }
        }
    }
}
