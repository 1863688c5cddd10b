//! Periodic reconciliation.

use crate::error::TriggerError;
use crate::reconcile::coordinator::RunCoordinator;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Trigger a run every `every`. Ticks that find a run in flight are skipped.
pub fn spawn_schedule(coordinator: RunCoordinator, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            match coordinator.trigger().await {
                Ok(record) => tracing::debug!(
                    name = "reconcile.schedule.run_done",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    run_id = %record.id(),
                    status = record.status().as_str(),
                    message = "Scheduled reconciliation finished"
                ),
                Err(TriggerError::AlreadyRunning(active)) => tracing::info!(
                    name = "reconcile.schedule.skipped",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    active_run = %active,
                    message = "Skipping scheduled reconciliation, a run is in progress"
                ),
                Err(e @ TriggerError::Aborted { .. }) => tracing::error!(
                    name = "reconcile.schedule.aborted",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    error = %e,
                    message = "Scheduled reconciliation stopped unexpectedly"
                ),
            }
        }
    })
}
