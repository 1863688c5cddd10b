//! Run lifecycle and the report handed back to callers.

use crate::error::InvalidTransition;
use crate::reconcile::model::EntityKind;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

/// Run state machine.
///
/// ```text
/// Idle -> Fetching -> Diffing -> Applying -> Completed | PartiallyFailed | Failed
///            |           |
///            +-> Failed  +-> Failed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Fetching,
    Diffing,
    Applying,
    Completed,
    PartiallyFailed,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::PartiallyFailed | RunState::Failed
        )
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Fetching)
                | (Fetching, Diffing)
                | (Fetching, Failed)
                | (Diffing, Applying)
                | (Diffing, Failed)
                | (Applying, Completed)
                | (Applying, PartiallyFailed)
                | (Applying, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Fetching => "fetching",
            RunState::Diffing => "diffing",
            RunState::Applying => "applying",
            RunState::Completed => "completed",
            RunState::PartiallyFailed => "partially_failed",
            RunState::Failed => "failed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Error taxonomy as reported to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientFetch,
    Validation,
    TransientApply,
    PermanentApply,
    Conflict,
    Store,
    Cancelled,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EntityCounts {
    pub created: u32,
    pub updated: u32,
    pub deleted: u32,
    pub failed: u32,
    pub unchanged: u32,
    /// Not attempted because the run was cancelled.
    pub skipped: u32,
}

impl EntityCounts {
    pub fn succeeded(&self) -> u32 {
        self.created + self.updated + self.deleted
    }

    pub(crate) fn record_success(&mut self, op: Operation) {
        match op {
            Operation::Create => self.created += 1,
            Operation::Update => self.updated += 1,
            Operation::Delete => self.deleted += 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RunCounts {
    pub clients: EntityCounts,
    pub scopes: EntityCounts,
}

impl RunCounts {
    pub fn for_kind(&self, kind: EntityKind) -> &EntityCounts {
        match kind {
            EntityKind::Client => &self.clients,
            EntityKind::Scope => &self.scopes,
        }
    }

    pub(crate) fn for_kind_mut(&mut self, kind: EntityKind) -> &mut EntityCounts {
        match kind {
            EntityKind::Client => &mut self.clients,
            EntityKind::Scope => &mut self.scopes,
        }
    }

    pub fn succeeded(&self) -> u32 {
        self.clients.succeeded() + self.scopes.succeeded()
    }

    pub fn failed(&self) -> u32 {
        self.clients.failed + self.scopes.failed
    }

    pub fn unchanged(&self) -> u32 {
        self.clients.unchanged + self.scopes.unchanged
    }

    pub fn skipped(&self) -> u32 {
        self.clients.skipped + self.scopes.skipped
    }
}

/// A remote operation that did not succeed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ItemError {
    pub identity: String,
    pub entity_type: EntityKind,
    pub operation: Operation,
    pub error_kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
}

/// Warning attached to an item that still succeeded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ItemNote {
    pub identity: String,
    pub entity_type: EntityKind,
    pub operation: Operation,
    pub kind: ErrorKind,
    pub message: String,
}

/// A remote operation that succeeded, with the attributes it changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AppliedItem {
    pub identity: String,
    pub entity_type: EntityKind,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_fields: Vec<String>,
}

/// Run-level failure: a fatal load or validation error, or cancellation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RunFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// Audit trail of one reconciliation run.
///
/// Only the coordinator mutates a record, and never once it is terminal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RunRecord {
    id: Uuid,
    status: RunState,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option", default)]
    #[schema(value_type = Option<String>, format = DateTime)]
    finished_at: Option<OffsetDateTime>,
    counts: RunCounts,
    errors: Vec<ItemError>,
    #[serde(default)]
    notes: Vec<ItemNote>,
    #[serde(default)]
    applied: Vec<AppliedItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<RunFailure>,
}

impl RunRecord {
    pub(crate) fn new(id: Uuid) -> Self {
        Self {
            id,
            status: RunState::Idle,
            started_at: OffsetDateTime::now_utc(),
            finished_at: None,
            counts: RunCounts::default(),
            errors: Vec::new(),
            notes: Vec::new(),
            applied: Vec::new(),
            failure: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> RunState {
        self.status
    }

    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<OffsetDateTime> {
        self.finished_at
    }

    pub fn counts(&self) -> &RunCounts {
        &self.counts
    }

    pub fn errors(&self) -> &[ItemError] {
        &self.errors
    }

    pub fn notes(&self) -> &[ItemNote] {
        &self.notes
    }

    pub fn applied(&self) -> &[AppliedItem] {
        &self.applied
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn transition(&mut self, next: RunState) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }

    /// Terminate with a run-level failure.
    pub(crate) fn fail(&mut self, failure: RunFailure) -> Result<(), InvalidTransition> {
        self.transition(RunState::Failed)?;
        self.failure = Some(failure);
        Ok(())
    }

    pub(crate) fn absorb(
        &mut self,
        counts: RunCounts,
        errors: Vec<ItemError>,
        notes: Vec<ItemNote>,
        applied: Vec<AppliedItem>,
    ) {
        if self.is_terminal() {
            return;
        }
        self.counts = counts;
        self.errors = errors;
        self.notes = notes;
        self.applied = applied;
    }

    pub(crate) fn set_failure(&mut self, failure: RunFailure) {
        if !self.is_terminal() {
            self.failure = Some(failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut run = RunRecord::new(Uuid::new_v4());
        for next in [
            RunState::Fetching,
            RunState::Diffing,
            RunState::Applying,
            RunState::Completed,
        ] {
            run.transition(next).unwrap();
        }
        assert!(run.is_terminal());
        assert!(run.finished_at().is_some());
    }

    #[test]
    fn terminal_records_are_frozen() {
        let mut run = RunRecord::new(Uuid::new_v4());
        run.transition(RunState::Fetching).unwrap();
        run.fail(RunFailure {
            kind: ErrorKind::TransientFetch,
            message: "down".into(),
        })
        .unwrap();
        assert!(run.transition(RunState::Diffing).is_err());
        assert!(run.transition(RunState::Completed).is_err());

        let counts = RunCounts {
            clients: EntityCounts {
                created: 5,
                ..EntityCounts::default()
            },
            ..RunCounts::default()
        };
        run.absorb(counts, Vec::new(), Vec::new(), Vec::new());
        assert_eq!(run.counts().clients.created, 0);
    }

    #[test]
    fn cannot_skip_states() {
        assert!(!RunState::Idle.can_transition_to(RunState::Applying));
        assert!(!RunState::Fetching.can_transition_to(RunState::Completed));
        assert!(!RunState::Diffing.can_transition_to(RunState::PartiallyFailed));
        assert!(RunState::Applying.can_transition_to(RunState::Failed));
    }

    #[test]
    fn serializes_report_shape() {
        let mut run = RunRecord::new(Uuid::new_v4());
        run.transition(RunState::Fetching).unwrap();
        run.transition(RunState::Diffing).unwrap();
        run.transition(RunState::Applying).unwrap();
        run.absorb(
            RunCounts::default(),
            vec![ItemError {
                identity: "svc-a".into(),
                entity_type: EntityKind::Client,
                operation: Operation::Create,
                error_kind: ErrorKind::PermanentApply,
                message: "HTTP 400".into(),
                attempts: 1,
            }],
            Vec::new(),
            Vec::new(),
        );
        run.transition(RunState::PartiallyFailed).unwrap();

        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["status"], "partially_failed");
        assert_eq!(json["errors"][0]["entity_type"], "client");
        assert_eq!(json["errors"][0]["error_kind"], "permanent_apply");
        assert_eq!(json["counts"]["scopes"]["created"], 0);

        let back: RunRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.id(), run.id());
        assert_eq!(back.errors().len(), 1);
    }
}
