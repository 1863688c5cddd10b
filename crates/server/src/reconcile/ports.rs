//! Boundaries of the reconciliation engine.

use crate::error::{RemoteError, StoreError};
use crate::reconcile::canonical::{Canonicalize, RemoteClient, RemoteScope};
use crate::reconcile::diff::Update;
use crate::reconcile::model::{
    Canonical, CanonicalClient, CanonicalScope, ClientRecord, ScopeRecord,
};
use crate::reconcile::run::RunRecord;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// One page of a remote listing.
#[derive(Clone, Debug, Default)]
pub struct Page {
    pub items: Vec<Value>,
    /// Cursor for the next page, `None` once the listing is exhausted.
    pub next_cursor: Option<String>,
}

/// The local system of record for intent. Read-only from the engine's side.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn list_active_clients(&self) -> Result<Vec<ClientRecord>, StoreError>;

    async fn list_active_scopes(&self) -> Result<Vec<ScopeRecord>, StoreError>;
}

/// Administrative API of the authorization server.
#[async_trait]
pub trait AdminApi: Send + Sync {
    async fn list_clients(&self, cursor: Option<&str>) -> Result<Page, RemoteError>;

    async fn create_client(&self, client: &CanonicalClient) -> Result<(), RemoteError>;

    async fn update_client(
        &self,
        client_id: &str,
        update: &Update<CanonicalClient>,
    ) -> Result<(), RemoteError>;

    async fn delete_client(&self, client_id: &str) -> Result<(), RemoteError>;

    async fn list_scopes(&self, cursor: Option<&str>) -> Result<Page, RemoteError>;

    async fn create_scope(&self, scope: &CanonicalScope) -> Result<(), RemoteError>;

    async fn update_scope(
        &self,
        name: &str,
        update: &Update<CanonicalScope>,
    ) -> Result<(), RemoteError>;

    async fn delete_scope(&self, name: &str) -> Result<(), RemoteError>;

    /// Readiness of the admin API.
    async fn health(&self) -> Result<(), RemoteError>;
}

/// Persistence for run reports.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save(&self, record: &RunRecord) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<RunRecord>, StoreError>;

    /// Most recent runs first.
    async fn recent(&self, limit: u64) -> Result<Vec<RunRecord>, StoreError>;
}

/// Dispatch from a canonical entity type to its admin API operations.
#[async_trait]
pub trait RemoteEntity: Canonical {
    async fn list_page(api: &dyn AdminApi, cursor: Option<&str>) -> Result<Page, RemoteError>;

    fn from_remote(raw: Value) -> Self;

    async fn create(api: &dyn AdminApi, entity: &Self) -> Result<(), RemoteError>;

    async fn update(api: &dyn AdminApi, update: &Update<Self>) -> Result<(), RemoteError>;

    async fn delete(api: &dyn AdminApi, identity: &str) -> Result<(), RemoteError>;
}

#[async_trait]
impl RemoteEntity for CanonicalClient {
    async fn list_page(api: &dyn AdminApi, cursor: Option<&str>) -> Result<Page, RemoteError> {
        api.list_clients(cursor).await
    }

    fn from_remote(raw: Value) -> Self {
        RemoteClient(raw).canonicalize()
    }

    async fn create(api: &dyn AdminApi, entity: &Self) -> Result<(), RemoteError> {
        api.create_client(entity).await
    }

    async fn update(api: &dyn AdminApi, update: &Update<Self>) -> Result<(), RemoteError> {
        api.update_client(update.identity(), update).await
    }

    async fn delete(api: &dyn AdminApi, identity: &str) -> Result<(), RemoteError> {
        api.delete_client(identity).await
    }
}

#[async_trait]
impl RemoteEntity for CanonicalScope {
    async fn list_page(api: &dyn AdminApi, cursor: Option<&str>) -> Result<Page, RemoteError> {
        api.list_scopes(cursor).await
    }

    fn from_remote(raw: Value) -> Self {
        RemoteScope(raw).canonicalize()
    }

    async fn create(api: &dyn AdminApi, entity: &Self) -> Result<(), RemoteError> {
        api.create_scope(entity).await
    }

    async fn update(api: &dyn AdminApi, update: &Update<Self>) -> Result<(), RemoteError> {
        api.update_scope(update.identity(), update).await
    }

    async fn delete(api: &dyn AdminApi, identity: &str) -> Result<(), RemoteError> {
        api.delete_scope(identity).await
    }
}
