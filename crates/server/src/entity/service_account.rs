//! Service account entity: one OAuth2 client managed locally.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "service_accounts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub client_id: String,
    /// Never synced; Hydra generates its own secret.
    pub client_secret: Option<String>,
    pub client_name: String,
    /// "Service-to-service" or "Browser"
    pub account_type: String,
    /// JSON array
    pub grant_types: String,
    /// JSON array
    pub response_types: String,
    /// JSON array
    pub redirect_uris: String,
    /// JSON array
    pub post_logout_redirect_uris: String,
    /// JSON array
    pub allowed_cors_origins: String,
    pub token_endpoint_auth_method: String,
    /// JSON array
    pub audience: String,
    pub owner: Option<String>,
    pub skip_consent: bool,
    /// JSON object
    pub client_metadata: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::service_account_scope::Entity")]
    ServiceAccountScope,
}

impl Related<super::service_account_scope::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ServiceAccountScope.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
