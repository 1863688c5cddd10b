//! Executing a plan against the admin API.

use crate::config::ReconcileConfig;
use crate::error::RemoteError;
use crate::reconcile::diff::{Plan, Update};
use crate::reconcile::model::Canonical;
use crate::reconcile::ports::{AdminApi, RemoteEntity};
use crate::reconcile::run::{AppliedItem, ErrorKind, ItemError, ItemNote, Operation, RunCounts};
use futures::{StreamExt, stream};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Shared stop signal for one run.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Exponential backoff for transient remote failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ReconcileConfig::default())
    }
}

/// Everything the executor learned while applying a plan.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApplyOutcome {
    pub counts: RunCounts,
    /// Phase order, then identity order within a phase.
    pub errors: Vec<ItemError>,
    pub notes: Vec<ItemNote>,
    pub applied: Vec<AppliedItem>,
}

enum Job<T> {
    Create(T),
    Update(Update<T>),
    Delete(T),
}

impl<T: Canonical> Job<T> {
    fn identity(&self) -> &str {
        match self {
            Job::Create(entity) | Job::Delete(entity) => entity.identity(),
            Job::Update(update) => update.identity(),
        }
    }

    fn operation(&self) -> Operation {
        match self {
            Job::Create(_) => Operation::Create,
            Job::Update(_) => Operation::Update,
            Job::Delete(_) => Operation::Delete,
        }
    }
}

enum ItemResult {
    Applied {
        item: AppliedItem,
        note: Option<ItemNote>,
    },
    Failed(ItemError),
    Skipped,
}

/// A call that did not succeed within the retry budget.
struct Exhausted {
    error: RemoteError,
    attempts: u32,
    /// Retries stopped because the run was cancelled.
    cancelled: bool,
}

fn error_kind(error: &RemoteError) -> ErrorKind {
    if error.is_transient() {
        ErrorKind::TransientApply
    } else if error.is_conflict() {
        ErrorKind::Conflict
    } else {
        ErrorKind::PermanentApply
    }
}

/// Applies a [`Plan`] in dependency order with bounded concurrency per phase.
#[derive(Clone)]
pub struct ApplyExecutor {
    api: Arc<dyn AdminApi>,
    max_in_flight: usize,
    retry: RetryPolicy,
}

impl ApplyExecutor {
    pub fn new(api: Arc<dyn AdminApi>, max_in_flight: usize, retry: RetryPolicy) -> Self {
        Self {
            api,
            max_in_flight: max_in_flight.max(1),
            retry,
        }
    }

    pub fn from_config(api: Arc<dyn AdminApi>, config: &ReconcileConfig) -> Self {
        Self::new(api, config.max_in_flight, RetryPolicy::from_config(config))
    }

    /// Scopes are created and updated before the clients that reference
    /// them, and deleted only after clients that might still reference them.
    #[tracing::instrument(
        name = "apply_plan",
        skip_all,
        fields(
            scope_mutations = plan.scopes.mutation_count(),
            client_mutations = plan.clients.mutation_count()
        )
    )]
    pub async fn apply(&self, plan: &Plan, cancel: &CancelFlag) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        outcome.counts.scopes.unchanged = plan.scopes.unchanged.len() as u32;
        outcome.counts.clients.unchanged = plan.clients.unchanged.len() as u32;

        let scopes = &plan.scopes;
        let clients = &plan.clients;

        self.phase(scopes.to_create.iter().cloned().map(Job::Create), cancel, &mut outcome)
            .await;
        self.phase(scopes.to_update.iter().cloned().map(Job::Update), cancel, &mut outcome)
            .await;
        self.phase(clients.to_create.iter().cloned().map(Job::Create), cancel, &mut outcome)
            .await;
        self.phase(clients.to_update.iter().cloned().map(Job::Update), cancel, &mut outcome)
            .await;
        self.phase(clients.to_delete.iter().cloned().map(Job::Delete), cancel, &mut outcome)
            .await;
        self.phase(scopes.to_delete.iter().cloned().map(Job::Delete), cancel, &mut outcome)
            .await;

        outcome
    }

    async fn phase<T: RemoteEntity>(
        &self,
        jobs: impl Iterator<Item = Job<T>>,
        cancel: &CancelFlag,
        outcome: &mut ApplyOutcome,
    ) {
        let jobs: Vec<Job<T>> = jobs.collect();
        let Some(first) = jobs.first() else {
            return;
        };
        let operation = first.operation();

        let pending: Vec<_> = jobs.iter().map(|job| self.run_job(job, cancel)).collect();
        let results: Vec<ItemResult> = stream::iter(pending)
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;

        let mut applied = Vec::new();
        let mut notes = Vec::new();
        let mut errors = Vec::new();
        let counts = outcome.counts.for_kind_mut(T::KIND);
        for result in results {
            match result {
                ItemResult::Applied { item, note } => {
                    counts.record_success(item.operation);
                    applied.push(item);
                    notes.extend(note);
                }
                ItemResult::Failed(error) => {
                    counts.failed += 1;
                    errors.push(error);
                }
                ItemResult::Skipped => counts.skipped += 1,
            }
        }

        applied.sort_by(|a, b| a.identity.cmp(&b.identity));
        notes.sort_by(|a, b| a.identity.cmp(&b.identity));
        errors.sort_by(|a, b| a.identity.cmp(&b.identity));

        tracing::info!(
            name = "reconcile.apply.phase_done",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            entity = %T::KIND,
            operation = ?operation,
            total = jobs.len(),
            succeeded = applied.len(),
            failed = errors.len(),
            message = "Apply phase finished"
        );

        outcome.applied.extend(applied);
        outcome.notes.extend(notes);
        outcome.errors.extend(errors);
    }

    async fn run_job<T: RemoteEntity>(&self, job: &Job<T>, cancel: &CancelFlag) -> ItemResult {
        if cancel.is_cancelled() {
            return ItemResult::Skipped;
        }
        let api = self.api.as_ref();
        let identity = job.identity();
        let operation = job.operation();

        let result = match job {
            Job::Create(entity) => {
                match self.with_retry(cancel, move || T::create(api, entity)).await {
                    Err(failed) if failed.error.is_conflict() => {
                        let overwrite = Update::overwrite(entity.clone());
                        let overwrite = &overwrite;
                        self.fallback(
                            cancel,
                            move || T::update(api, overwrite),
                            failed,
                            "already existed remotely, overwritten with desired state",
                        )
                        .await
                    }
                    other => other.map(|_| None),
                }
            }
            Job::Update(update) => {
                match self.with_retry(cancel, move || T::update(api, update)).await {
                    Err(failed) if failed.error.is_not_found() => {
                        let desired = &update.desired;
                        self.fallback(
                            cancel,
                            move || T::create(api, desired),
                            failed,
                            "missing remotely, recreated from desired state",
                        )
                        .await
                    }
                    other => other.map(|_| None),
                }
            }
            Job::Delete(entity) => {
                match self
                    .with_retry(cancel, move || T::delete(api, entity.identity()))
                    .await
                {
                    Err(failed) if failed.error.is_not_found() => {
                        Ok(Some("already absent remotely".to_string()))
                    }
                    other => other.map(|_| None),
                }
            }
        };

        match result {
            Ok(note) => {
                tracing::debug!(
                    name = "reconcile.apply.item_applied",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    entity = %T::KIND,
                    identity,
                    operation = ?operation,
                    message = "Applied change"
                );
                let changed_fields = match job {
                    Job::Update(update) => update.changed_fields(),
                    _ => Vec::new(),
                };
                ItemResult::Applied {
                    item: AppliedItem {
                        identity: identity.to_string(),
                        entity_type: T::KIND,
                        operation,
                        changed_fields,
                    },
                    note: note.map(|message| ItemNote {
                        identity: identity.to_string(),
                        entity_type: T::KIND,
                        operation,
                        kind: ErrorKind::Conflict,
                        message,
                    }),
                }
            }
            Err(failed) => {
                tracing::warn!(
                    name = "reconcile.apply.item_failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    entity = %T::KIND,
                    identity,
                    operation = ?operation,
                    attempts = failed.attempts,
                    cancelled = failed.cancelled,
                    error = %failed.error,
                    message = "Failed to apply change"
                );
                let (kind, message) = if failed.cancelled {
                    (
                        ErrorKind::Cancelled,
                        format!("cancelled before retrying: {}", failed.error),
                    )
                } else {
                    (error_kind(&failed.error), failed.error.to_string())
                };
                ItemResult::Failed(ItemError {
                    identity: identity.to_string(),
                    entity_type: T::KIND,
                    operation,
                    error_kind: kind,
                    message,
                    attempts: failed.attempts,
                })
            }
        }
    }

    /// Second call issued after a conflict; attempts accumulate into the item.
    async fn fallback<F, Fut>(
        &self,
        cancel: &CancelFlag,
        call: F,
        prior: Exhausted,
        note: &str,
    ) -> Result<Option<String>, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), RemoteError>>,
    {
        if cancel.is_cancelled() {
            return Err(Exhausted {
                cancelled: true,
                ..prior
            });
        }
        match self.with_retry(cancel, call).await {
            Ok(_) => Ok(Some(note.to_string())),
            Err(failed) => Err(Exhausted {
                attempts: prior.attempts + failed.attempts,
                ..failed
            }),
        }
    }

    /// Retries transient failures with backoff until the budget runs out
    /// or the run is cancelled.
    async fn with_retry<F, Fut>(
        &self,
        cancel: &CancelFlag,
        mut call: F,
    ) -> Result<u32, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), RemoteError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(()) => return Ok(attempt),
                Err(error) if error.is_transient() && attempt < self.retry.max_attempts => {
                    if cancel.is_cancelled() {
                        return Err(Exhausted {
                            error,
                            attempts: attempt,
                            cancelled: true,
                        });
                    }
                    let delay = self.retry.backoff(attempt);
                    tracing::debug!(
                        name = "reconcile.apply.retry",
                        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        message = "Transient admin API failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    if cancel.is_cancelled() {
                        return Err(Exhausted {
                            error,
                            attempts: attempt,
                            cancelled: true,
                        });
                    }
                    attempt += 1;
                }
                Err(error) => {
                    return Err(Exhausted {
                        error,
                        attempts: attempt,
                        cancelled: false,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(700),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(700));
        assert_eq!(policy.backoff(64), Duration::from_millis(700));
    }

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn remote_errors_classify_into_report_kinds() {
        use reqwest::StatusCode;
        assert_eq!(
            error_kind(&RemoteError::http(StatusCode::SERVICE_UNAVAILABLE, "")),
            ErrorKind::TransientApply
        );
        assert_eq!(
            error_kind(&RemoteError::http(StatusCode::CONFLICT, "")),
            ErrorKind::Conflict
        );
        assert_eq!(
            error_kind(&RemoteError::http(StatusCode::UNPROCESSABLE_ENTITY, "")),
            ErrorKind::PermanentApply
        );
    }
}
