//! Single-flight orchestration of reconciliation runs.

use crate::config::ReconcileConfig;
use crate::error::{RunError, StoreError, TriggerError};
use crate::reconcile::apply::{ApplyExecutor, ApplyOutcome, CancelFlag};
use crate::reconcile::diff;
use crate::reconcile::ports::{AdminApi, PolicyStore, RunStore};
use crate::reconcile::run::{ErrorKind, RunFailure, RunRecord, RunState};
use crate::reconcile::source::{DesiredStateReader, ObservedStateFetcher};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

struct ActiveRun {
    record: RunRecord,
    cancel: CancelFlag,
}

type Slot = Arc<Mutex<Option<ActiveRun>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<ActiveRun>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Exclusive right to execute one run. Dropping it frees the slot.
pub struct RunTicket {
    record: RunRecord,
    cancel: CancelFlag,
    slot: Slot,
}

impl RunTicket {
    pub fn id(&self) -> Uuid {
        self.record.id()
    }
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        let mut active = lock(&self.slot);
        if active
            .as_ref()
            .is_some_and(|run| run.record.id() == self.record.id())
        {
            *active = None;
        }
    }
}

/// Owns the run lifecycle: at most one run is active at any time.
#[derive(Clone)]
pub struct RunCoordinator {
    desired: DesiredStateReader,
    observed: ObservedStateFetcher,
    executor: ApplyExecutor,
    runs: Arc<dyn RunStore>,
    active: Slot,
}

impl RunCoordinator {
    pub fn new(
        store: Arc<dyn PolicyStore>,
        api: Arc<dyn AdminApi>,
        runs: Arc<dyn RunStore>,
        config: &ReconcileConfig,
    ) -> Self {
        Self {
            desired: DesiredStateReader::new(store),
            observed: ObservedStateFetcher::new(api.clone()),
            executor: ApplyExecutor::from_config(api, config),
            runs,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Claim the active-run slot, or report the run holding it.
    pub fn begin(&self) -> Result<RunTicket, TriggerError> {
        let mut active = lock(&self.active);
        if let Some(run) = active.as_ref() {
            return Err(TriggerError::AlreadyRunning(run.record.id()));
        }
        let record = RunRecord::new(Uuid::new_v4());
        let cancel = CancelFlag::new();
        *active = Some(ActiveRun {
            record: record.clone(),
            cancel: cancel.clone(),
        });
        Ok(RunTicket {
            record,
            cancel,
            slot: self.active.clone(),
        })
    }

    /// Run to completion and return the terminal record.
    ///
    /// The run lives on its own task; dropping the returned future only
    /// stops waiting for it.
    pub async fn trigger(&self) -> Result<RunRecord, TriggerError> {
        let ticket = self.begin()?;
        let run_id = ticket.id();
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.execute(ticket).await })
            .await
            .map_err(|e| {
                tracing::error!(
                    name = "reconcile.run.aborted",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    run_id = %run_id,
                    error = %e,
                    message = "Reconciliation task did not finish"
                );
                TriggerError::Aborted {
                    run_id,
                    reason: e.to_string(),
                }
            })
    }

    /// Start a run on a background task and return its id immediately.
    pub fn trigger_background(&self) -> Result<Uuid, TriggerError> {
        let ticket = self.begin()?;
        let id = ticket.id();
        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.execute(ticket).await;
        });
        Ok(id)
    }

    /// Snapshot of the active run, if any.
    pub fn current(&self) -> Option<RunRecord> {
        lock(&self.active).as_ref().map(|run| run.record.clone())
    }

    /// Ask the active run to stop issuing remote operations.
    pub fn cancel(&self) -> Option<Uuid> {
        let active = lock(&self.active);
        let run = active.as_ref()?;
        run.cancel.cancel();
        tracing::info!(
            name = "reconcile.run.cancel_requested",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            run_id = %run.record.id(),
            message = "Cancellation requested"
        );
        Some(run.record.id())
    }

    /// A run by id; the active run is served live.
    pub async fn run(&self, id: Uuid) -> Result<Option<RunRecord>, StoreError> {
        if let Some(live) = self.current().filter(|run| run.id() == id) {
            return Ok(Some(live));
        }
        self.runs.get(id).await
    }

    pub async fn history(&self, limit: u64) -> Result<Vec<RunRecord>, StoreError> {
        self.runs.recent(limit).await
    }

    #[tracing::instrument(name = "reconcile_run", skip_all, fields(run_id = %ticket.id()))]
    pub async fn execute(&self, mut ticket: RunTicket) -> RunRecord {
        tracing::info!(
            name = "reconcile.run.started",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            message = "Reconciliation run started"
        );

        if let Err(error) = self.drive(&mut ticket).await {
            tracing::error!(
                name = "reconcile.run.failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                error = %error,
                kind = ?error.kind(),
                message = "Reconciliation run failed"
            );
            let failure = RunFailure {
                kind: error.kind(),
                message: error.to_string(),
            };
            if let Err(invalid) = ticket.record.fail(failure) {
                tracing::error!(
                    name = "reconcile.run.invalid_transition",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    error = %invalid,
                    message = "Could not mark run as failed"
                );
            }
            self.publish(&ticket);
        }

        let record = ticket.record.clone();
        let counts = record.counts();
        tracing::info!(
            name = "reconcile.run.finished",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            status = record.status().as_str(),
            succeeded = counts.succeeded(),
            failed = counts.failed(),
            unchanged = counts.unchanged(),
            skipped = counts.skipped(),
            message = "Reconciliation run finished"
        );
        self.persist(&record).await;
        record
    }

    async fn drive(&self, ticket: &mut RunTicket) -> Result<(), RunError> {
        self.advance(ticket, RunState::Fetching);
        self.persist(&ticket.record).await;

        let (desired, observed) = tokio::try_join!(
            async { self.desired.load().await.map_err(RunError::from) },
            async { self.observed.load().await.map_err(RunError::from) }
        )?;
        if ticket.cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        self.advance(ticket, RunState::Diffing);
        let plan = diff::plan(&desired, &observed)?;
        tracing::info!(
            name = "reconcile.run.planned",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            scopes_create = plan.scopes.to_create.len(),
            scopes_update = plan.scopes.to_update.len(),
            scopes_delete = plan.scopes.to_delete.len(),
            clients_create = plan.clients.to_create.len(),
            clients_update = plan.clients.to_update.len(),
            clients_delete = plan.clients.to_delete.len(),
            unchanged = plan.unchanged_count(),
            message = "Computed change set"
        );

        self.advance(ticket, RunState::Applying);
        let outcome = self.executor.apply(&plan, &ticket.cancel).await;
        let cancelled = ticket.cancel.is_cancelled();
        let status = settle(&outcome, cancelled);
        let ApplyOutcome {
            counts,
            errors,
            notes,
            applied,
        } = outcome;
        ticket.record.absorb(counts, errors, notes, applied);
        if cancelled {
            let interrupted = ticket
                .record
                .errors()
                .iter()
                .filter(|e| e.error_kind == ErrorKind::Cancelled)
                .count();
            ticket.record.set_failure(RunFailure {
                kind: ErrorKind::Cancelled,
                message: format!(
                    "Run cancelled, {} change(s) not attempted, {} interrupted while retrying",
                    ticket.record.counts().skipped(),
                    interrupted
                ),
            });
        }
        self.advance(ticket, status);
        Ok(())
    }

    fn advance(&self, ticket: &mut RunTicket, next: RunState) {
        if let Err(invalid) = ticket.record.transition(next) {
            tracing::error!(
                name = "reconcile.run.invalid_transition",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                error = %invalid,
                message = "Rejected run state transition"
            );
            return;
        }
        self.publish(ticket);
    }

    fn publish(&self, ticket: &RunTicket) {
        let mut active = lock(&self.active);
        if let Some(run) = active
            .as_mut()
            .filter(|run| run.record.id() == ticket.record.id())
        {
            run.record = ticket.record.clone();
        }
    }

    async fn persist(&self, record: &RunRecord) {
        if let Err(e) = self.runs.save(record).await {
            tracing::error!(
                name = "reconcile.run.persist_failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                run_id = %record.id(),
                error = %e,
                message = "Failed to persist run record"
            );
        }
    }
}

/// Terminal status for a run that reached the apply phase.
pub fn settle(outcome: &ApplyOutcome, cancelled: bool) -> RunState {
    let counts = &outcome.counts;
    if cancelled {
        return if counts.succeeded() > 0 {
            RunState::PartiallyFailed
        } else {
            RunState::Failed
        };
    }
    if counts.failed() == 0 {
        RunState::Completed
    } else if counts.succeeded() > 0 || counts.unchanged() > 0 {
        RunState::PartiallyFailed
    } else {
        RunState::Failed
    }
}
