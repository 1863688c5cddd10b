//! Reconciles ORY Hydra's OAuth2 clients and scopes with a local policy store.
//!
//! The local database is the source of truth. A run reads the desired state,
//! lists what Hydra currently holds, computes a field-level change set and
//! applies it, recording the outcome as a run report.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::api::SyncAppState;
use crate::config::AppConfig;
use crate::error::RemoteError;
use crate::hydra::HydraAdminClient;
use crate::reconcile::coordinator::RunCoordinator;
use crate::reconcile::ports::AdminApi;
use crate::store::{DbPolicyStore, DbRunStore};

pub mod api;
pub mod config;
pub mod entity;
pub mod error;
pub mod hydra;
pub mod reconcile;
pub mod store;

#[derive(Clone, Debug)]
pub struct AppResources {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
}

impl AppResources {
    /// Wire the database stores and the Hydra client into a coordinator.
    pub fn sync_state(&self) -> Result<SyncAppState, RemoteError> {
        let admin: Arc<dyn AdminApi> = Arc::new(HydraAdminClient::new(&self.config.hydra)?);
        let coordinator = RunCoordinator::new(
            Arc::new(DbPolicyStore::new(self.db.clone())),
            admin.clone(),
            Arc::new(DbRunStore::new(self.db.clone())),
            &self.config.reconcile,
        );
        Ok(SyncAppState { coordinator, admin })
    }
}
