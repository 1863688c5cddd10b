use crate::reconcile::model::EntityKind;
use crate::reconcile::run::{ErrorKind, RunState};
use reqwest::StatusCode;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Failure talking to the Hydra admin API.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Timeout after {0:?} calling the admin API")]
    Timeout(std::time::Duration),
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status} from the admin API: {context}")]
    Http { status: StatusCode, context: String },
    #[error("Invalid response body: {0}")]
    InvalidBody(String),
}

impl RemoteError {
    pub fn http(status: StatusCode, context: impl Into<String>) -> Self {
        RemoteError::Http {
            status,
            context: context.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Timeout(_) | RemoteError::Network(_) => true,
            RemoteError::Http { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            RemoteError::InvalidBody(_) => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Http { status, .. } if *status == StatusCode::CONFLICT)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Http { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

/// Failure reading or writing the local database.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("Corrupt {table} row {id}: {message}")]
    Corrupt {
        table: &'static str,
        id: String,
        message: String,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn corrupt(table: &'static str, id: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Corrupt {
            table,
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Failure loading the complete observed state.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to list remote {entity}s: {source}")]
    Remote {
        entity: EntityKind,
        #[source]
        source: RemoteError,
    },
    #[error("Remote {entity} listing returned page cursor {cursor:?} twice")]
    CursorLoop { entity: EntityKind, cursor: String },
}

/// A client referencing a scope that is not part of the desired state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DanglingScope {
    pub client_id: String,
    pub scope: String,
}

/// Desired state that must not be applied.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub struct ValidationError {
    pub dangling: Vec<DanglingScope>,
    /// Scope names containing whitespace; Hydra stores a client's scopes
    /// as one space-separated string, so these can never round-trip.
    pub spaced_names: Vec<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.dangling.is_empty() {
            write!(f, "clients reference scopes absent from desired state:")?;
            for (i, d) in self.dangling.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                write!(f, "{sep}{} -> {}", d.client_id, d.scope)?;
            }
        }
        if !self.spaced_names.is_empty() {
            if !self.dangling.is_empty() {
                write!(f, "; ")?;
            }
            write!(f, "scope names contain whitespace:")?;
            for (i, name) in self.spaced_names.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                write!(f, "{sep}{name:?}")?;
            }
        }
        Ok(())
    }
}

/// Why a trigger did not start a run.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("A reconciliation run is already in progress ({0})")]
    AlreadyRunning(Uuid),
    #[error("Reconciliation run {run_id} stopped unexpectedly: {reason}")]
    Aborted { run_id: Uuid, reason: String },
}

/// Reason a run ended before item-level work could decide its status.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Failed to load desired state: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to load observed state: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Run cancelled before any change was applied")]
    Cancelled,
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunError::Store(_) => ErrorKind::Store,
            RunError::Fetch(_) => ErrorKind::TransientFetch,
            RunError::Validation(_) => ErrorKind::Validation,
            RunError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Illegal run state change.
#[derive(Debug, Error)]
#[error("Invalid state transition from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: RunState,
    pub to: RunState,
}
