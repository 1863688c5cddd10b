//! Reconciliation of local service accounts and scopes into Hydra.
//!
//! Data flows one way: the policy store is read, the admin API is listed,
//! both sides are canonicalized and diffed, and the resulting plan is applied
//! to the admin API.

pub mod apply;
pub mod canonical;
pub mod coordinator;
pub mod diff;
pub mod model;
pub mod ports;
pub mod run;
pub mod schedule;
pub mod source;
pub mod wire;

pub use apply::{ApplyExecutor, ApplyOutcome, CancelFlag, RetryPolicy};
pub use coordinator::{RunCoordinator, RunTicket};
pub use diff::{ChangeSet, FieldChange, Plan, Update};
pub use model::{
    AccountType, Canonical, CanonicalClient, CanonicalScope, ClientRecord, EntityKind, ScopeRecord,
};
pub use ports::{AdminApi, Page, PolicyStore, RunStore};
pub use run::{ErrorKind, Operation, RunRecord, RunState};
pub use source::{DesiredStateReader, ObservedStateFetcher, StateSnapshot};
