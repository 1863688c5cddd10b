//! Database-backed policy store and run history.

use crate::entity::{scope, service_account, service_account_scope, sync_run};
use crate::error::StoreError;
use crate::reconcile::model::{AccountType, ClientRecord, ScopeRecord};
use crate::reconcile::ports::{PolicyStore, RunStore};
use crate::reconcile::run::RunRecord;
use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Reads service accounts and scopes managed in the local database.
#[derive(Clone, Debug)]
pub struct DbPolicyStore {
    db: Arc<DatabaseConnection>,
}

impl DbPolicyStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn json_list(
    table: &'static str,
    id: &str,
    column: &str,
    raw: &str,
) -> Result<Vec<String>, StoreError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
        .map_err(|e| StoreError::corrupt(table, id, format!("{column}: {e}")))
}

fn json_object(
    table: &'static str,
    id: &str,
    column: &str,
    raw: &str,
) -> Result<Map<String, Value>, StoreError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(raw)
        .map_err(|e| StoreError::corrupt(table, id, format!("{column}: {e}")))
}

fn client_record(
    row: service_account::Model,
    scopes: Vec<String>,
) -> Result<ClientRecord, StoreError> {
    const TABLE: &str = "service_accounts";
    let id = row.client_id.as_str();
    let account_type = AccountType::parse(&row.account_type).ok_or_else(|| {
        StoreError::corrupt(
            TABLE,
            id,
            format!("unknown account_type {:?}", row.account_type),
        )
    })?;

    Ok(ClientRecord {
        client_name: row.client_name.clone(),
        account_type,
        grant_types: json_list(TABLE, id, "grant_types", &row.grant_types)?,
        response_types: json_list(TABLE, id, "response_types", &row.response_types)?,
        redirect_uris: json_list(TABLE, id, "redirect_uris", &row.redirect_uris)?,
        post_logout_redirect_uris: json_list(
            TABLE,
            id,
            "post_logout_redirect_uris",
            &row.post_logout_redirect_uris,
        )?,
        allowed_cors_origins: json_list(
            TABLE,
            id,
            "allowed_cors_origins",
            &row.allowed_cors_origins,
        )?,
        token_endpoint_auth_method: row.token_endpoint_auth_method.clone(),
        audience: json_list(TABLE, id, "audience", &row.audience)?,
        scopes,
        owner: row.owner.clone(),
        skip_consent: row.skip_consent,
        active: row.is_active,
        metadata: json_object(TABLE, id, "client_metadata", &row.client_metadata)?,
        client_secret: row.client_secret.clone(),
        client_id: row.client_id,
    })
}

fn scope_record(row: scope::Model) -> Result<ScopeRecord, StoreError> {
    let entries = row.applies_to_list();
    let applies_to = if entries.is_empty() {
        vec![AccountType::Service, AccountType::Browser]
    } else {
        entries
            .into_iter()
            .map(|entry| {
                AccountType::parse(entry).ok_or_else(|| {
                    StoreError::corrupt(
                        "scopes",
                        row.name.as_str(),
                        format!("unknown applies_to entry {entry:?}"),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(ScopeRecord {
        description: row.description.clone().unwrap_or_default(),
        applies_to,
        active: row.is_active,
        name: row.name,
    })
}

#[async_trait]
impl PolicyStore for DbPolicyStore {
    /// Scope names include inactive scopes so that references to them stay
    /// visible to validation instead of silently disappearing.
    #[tracing::instrument(skip(self))]
    async fn list_active_clients(&self) -> Result<Vec<ClientRecord>, StoreError> {
        let db = self.db.as_ref();
        let accounts = service_account::Entity::find()
            .filter(service_account::Column::IsActive.eq(true))
            .order_by_asc(service_account::Column::ClientId)
            .all(db)
            .await?;
        let scope_names: HashMap<i32, String> = scope::Entity::find()
            .select_only()
            .column(scope::Column::Id)
            .column(scope::Column::Name)
            .into_tuple::<(i32, String)>()
            .all(db)
            .await?
            .into_iter()
            .collect();
        let links = service_account_scope::Entity::find().all(db).await?;

        let mut granted: HashMap<i32, Vec<String>> = HashMap::new();
        for link in links {
            if let Some(name) = scope_names.get(&link.scope_id) {
                granted
                    .entry(link.service_account_id)
                    .or_default()
                    .push(name.clone());
            }
        }

        accounts
            .into_iter()
            .map(|row| {
                let scopes = granted.remove(&row.id).unwrap_or_default();
                client_record(row, scopes)
            })
            .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn list_active_scopes(&self) -> Result<Vec<ScopeRecord>, StoreError> {
        scope::Entity::find()
            .filter(scope::Column::IsActive.eq(true))
            .order_by_asc(scope::Column::Name)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(scope_record)
            .collect()
    }
}

/// Run reports stored as JSON in `sync_run`.
#[derive(Clone, Debug)]
pub struct DbRunStore {
    db: Arc<DatabaseConnection>,
}

impl DbRunStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn decode_run(row: sync_run::Model) -> Result<RunRecord, StoreError> {
    serde_json::from_str(&row.report)
        .map_err(|e| StoreError::corrupt("sync_run", row.id, e.to_string()))
}

#[async_trait]
impl RunStore for DbRunStore {
    #[tracing::instrument(skip(self, record), fields(run_id = %record.id()))]
    async fn save(&self, record: &RunRecord) -> Result<(), StoreError> {
        let row = sync_run::ActiveModel {
            id: ActiveValue::Set(record.id().to_string()),
            status: ActiveValue::Set(record.status().as_str().to_string()),
            started_at: ActiveValue::Set(record.started_at()),
            finished_at: ActiveValue::Set(record.finished_at()),
            report: ActiveValue::Set(serde_json::to_string(record)?),
        };
        sync_run::Entity::insert(row)
            .on_conflict(
                OnConflict::column(sync_run::Column::Id)
                    .update_columns([
                        sync_run::Column::Status,
                        sync_run::Column::FinishedAt,
                        sync_run::Column::Report,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, id: Uuid) -> Result<Option<RunRecord>, StoreError> {
        sync_run::Entity::find_by_id(id.to_string())
            .one(self.db.as_ref())
            .await?
            .map(decode_run)
            .transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn recent(&self, limit: u64) -> Result<Vec<RunRecord>, StoreError> {
        sync_run::Entity::find()
            .order_by_desc(sync_run::Column::StartedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(decode_run)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn account(account_type: &str) -> service_account::Model {
        service_account::Model {
            id: 1,
            client_id: "svc-a".into(),
            client_secret: Some("s3cret".into()),
            client_name: "Service A".into(),
            account_type: account_type.into(),
            grant_types: r#"["client_credentials"]"#.into(),
            response_types: "[]".into(),
            redirect_uris: "".into(),
            post_logout_redirect_uris: "[]".into(),
            allowed_cors_origins: "[]".into(),
            token_endpoint_auth_method: "client_secret_basic".into(),
            audience: r#"["https://api.example.com"]"#.into(),
            owner: None,
            skip_consent: true,
            client_metadata: r#"{"team":"core"}"#.into(),
            description: None,
            is_active: true,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn maps_account_row() {
        let record = client_record(account("Service-to-service"), vec!["read".into()]).unwrap();
        assert_eq!(record.account_type, AccountType::Service);
        assert_eq!(record.grant_types, vec!["client_credentials".to_string()]);
        assert!(record.redirect_uris.is_empty());
        assert_eq!(record.metadata["team"], "core");
        assert_eq!(record.scopes, vec!["read".to_string()]);
    }

    #[test]
    fn corrupt_columns_are_reported() {
        let mut row = account("Browser");
        row.grant_types = "not json".into();
        let err = client_record(row, Vec::new()).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { table: "service_accounts", .. }));

        let err = client_record(account("Robot"), Vec::new()).unwrap_err();
        assert!(err.to_string().contains("account_type"));
    }

    #[test]
    fn scope_applies_to_defaults_to_both() {
        let row = scope::Model {
            id: 1,
            name: "read".into(),
            description: None,
            applies_to: "".into(),
            is_active: true,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        };
        let record = scope_record(row).unwrap();
        assert_eq!(
            record.applies_to,
            vec![AccountType::Service, AccountType::Browser]
        );
        assert_eq!(record.description, "");
    }
}
