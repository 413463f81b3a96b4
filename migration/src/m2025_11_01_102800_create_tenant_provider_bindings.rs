//! Migration to create the tenant_provider_bindings table.
//!
//! Each row links one tenant to one provider and carries the encrypted
//! credential blob plus the sync watermark. The composite unique index on
//! `(tenant_id, provider_id)` backs the one-binding-per-pair rule.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TenantProviderBindings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TenantProviderBindings::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(TenantProviderBindings::TenantId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TenantProviderBindings::ProviderId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TenantProviderBindings::EncryptedConfig)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TenantProviderBindings::IsEnabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(TenantProviderBindings::LastSyncWatermark)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TenantProviderBindings::LastSyncStatus)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TenantProviderBindings::LastSyncError)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TenantProviderBindings::LastSyncAttemptAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TenantProviderBindings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(TenantProviderBindings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tenant_provider_bindings_provider_id")
                            .from(
                                TenantProviderBindings::Table,
                                TenantProviderBindings::ProviderId,
                            )
                            .to(Providers::Table, Providers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tenant_provider_bindings_tenant_provider")
                    .table(TenantProviderBindings::Table)
                    .col(TenantProviderBindings::TenantId)
                    .col(TenantProviderBindings::ProviderId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tenant_provider_bindings_tenant_id")
                    .table(TenantProviderBindings::Table)
                    .col(TenantProviderBindings::TenantId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_tenant_provider_bindings_tenant_provider")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_tenant_provider_bindings_tenant_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(TenantProviderBindings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TenantProviderBindings {
    Table,
    Id,
    TenantId,
    ProviderId,
    EncryptedConfig,
    IsEnabled,
    LastSyncWatermark,
    LastSyncStatus,
    LastSyncError,
    LastSyncAttemptAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Providers {
    Table,
    Id,
}
