//! Creates the policy store and run history tables:
//! - service_accounts: OAuth2 clients managed locally
//! - scopes: OAuth2 scopes managed locally
//! - service_account_scopes: scope grants per service account
//! - sync_run: reconciliation run reports

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ServiceAccounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ServiceAccounts::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ServiceAccounts::ClientId)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(ServiceAccounts::ClientSecret).string().null())
                    .col(ColumnDef::new(ServiceAccounts::ClientName).string().not_null())
                    .col(
                        ColumnDef::new(ServiceAccounts::AccountType)
                            .string()
                            .not_null()
                            .default("Service-to-service"),
                    )
                    .col(
                        ColumnDef::new(ServiceAccounts::GrantTypes)
                            .text()
                            .not_null()
                            .default(r#"["client_credentials"]"#),
                    )
                    .col(
                        ColumnDef::new(ServiceAccounts::ResponseTypes)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(ServiceAccounts::RedirectUris)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(ServiceAccounts::PostLogoutRedirectUris)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(ServiceAccounts::AllowedCorsOrigins)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(ServiceAccounts::TokenEndpointAuthMethod)
                            .string()
                            .not_null()
                            .default("client_secret_basic"),
                    )
                    .col(
                        ColumnDef::new(ServiceAccounts::Audience)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(ColumnDef::new(ServiceAccounts::Owner).string().null())
                    .col(
                        ColumnDef::new(ServiceAccounts::SkipConsent)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ServiceAccounts::ClientMetadata)
                            .text()
                            .not_null()
                            .default("{}"),
                    )
                    .col(ColumnDef::new(ServiceAccounts::Description).text().null())
                    .col(
                        ColumnDef::new(ServiceAccounts::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ServiceAccounts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ServiceAccounts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Scopes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Scopes::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Scopes::Name)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Scopes::Description).text().null())
                    .col(
                        ColumnDef::new(Scopes::AppliesTo)
                            .string()
                            .not_null()
                            .default("Service-to-service,Browser"),
                    )
                    .col(
                        ColumnDef::new(Scopes::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Scopes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Scopes::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ServiceAccountScopes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ServiceAccountScopes::ServiceAccountId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ServiceAccountScopes::ScopeId)
                            .integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(ServiceAccountScopes::ServiceAccountId)
                            .col(ServiceAccountScopes::ScopeId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_service_account_scopes_account")
                            .from(
                                ServiceAccountScopes::Table,
                                ServiceAccountScopes::ServiceAccountId,
                            )
                            .to(ServiceAccounts::Table, ServiceAccounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_service_account_scopes_scope")
                            .from(ServiceAccountScopes::Table, ServiceAccountScopes::ScopeId)
                            .to(Scopes::Table, Scopes::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SyncRun::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncRun::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncRun::Status).string().not_null())
                    .col(
                        ColumnDef::new(SyncRun::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncRun::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncRun::Report).text().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_sync_run_started_at")
                    .table(SyncRun::Table)
                    .col(SyncRun::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_sync_run_started_at").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SyncRun::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ServiceAccountScopes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Scopes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ServiceAccounts::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum ServiceAccounts {
    Table,
    Id,
    ClientId,
    ClientSecret,
    ClientName,
    AccountType,
    GrantTypes,
    ResponseTypes,
    RedirectUris,
    PostLogoutRedirectUris,
    AllowedCorsOrigins,
    TokenEndpointAuthMethod,
    Audience,
    Owner,
    SkipConsent,
    ClientMetadata,
    Description,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Scopes {
    Table,
    Id,
    Name,
    Description,
    AppliesTo,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ServiceAccountScopes {
    Table,
    ServiceAccountId,
    ScopeId,
}

#[derive(DeriveIden)]
enum SyncRun {
    Table,
    Id,
    Status,
    StartedAt,
    FinishedAt,
    Report,
}
