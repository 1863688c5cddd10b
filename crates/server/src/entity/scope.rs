use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "scopes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    pub description: Option<String>,
    /// Comma-separated account types, e.g. "Service-to-service,Browser"
    pub applies_to: String,
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

impl Model {
    /// Raw `applies_to` entries, trimmed, empties dropped.
    pub fn applies_to_list(&self) -> Vec<&str> {
        self.applies_to
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}
