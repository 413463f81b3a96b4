//! Tenant provider binding repository
//!
//! Every query is tenant-scoped except the sweep helpers used by the batch
//! runner. The repository stores ciphertext as given and never decrypts it.

use chrono::{DateTime, Utc};
use sea_orm::prelude::{DateTimeWithTimeZone, Expr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;

use crate::models::provider::{self, Entity as Provider};
use crate::models::tenant_provider_binding::{
    self, Entity as TenantProviderBinding, SYNC_STATUS_FAILED, SYNC_STATUS_SUCCESS,
};

/// Partial update of a binding row. `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct BindingUpdate {
    pub encrypted_config: Option<Option<String>>,
    pub is_enabled: Option<bool>,
    pub last_sync_watermark: Option<Option<DateTimeWithTimeZone>>,
}

/// Repository for tenant provider binding operations
#[derive(Debug, Clone)]
pub struct BindingRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl BindingRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Finds the binding for a tenant/provider pair
    pub async fn find(
        &self,
        tenant_id: i64,
        provider_id: i32,
    ) -> Result<Option<tenant_provider_binding::Model>, DbErr> {
        TenantProviderBinding::find()
            .filter(tenant_provider_binding::Column::TenantId.eq(tenant_id))
            .filter(tenant_provider_binding::Column::ProviderId.eq(provider_id))
            .one(&*self.db)
            .await
    }

    /// All bindings of a tenant with their provider, ordered by binding id
    pub async fn list_for_tenant(
        &self,
        tenant_id: i64,
    ) -> Result<Vec<(tenant_provider_binding::Model, Option<provider::Model>)>, DbErr> {
        TenantProviderBinding::find()
            .find_also_related(Provider)
            .filter(tenant_provider_binding::Column::TenantId.eq(tenant_id))
            .order_by_asc(tenant_provider_binding::Column::Id)
            .all(&*self.db)
            .await
    }

    /// Enabled bindings of a tenant whose provider is active
    pub async fn list_syncable(
        &self,
        tenant_id: i64,
    ) -> Result<Vec<(tenant_provider_binding::Model, provider::Model)>, DbErr> {
        let rows = TenantProviderBinding::find()
            .find_also_related(Provider)
            .filter(tenant_provider_binding::Column::TenantId.eq(tenant_id))
            .filter(tenant_provider_binding::Column::IsEnabled.eq(true))
            .filter(provider::Column::IsActive.eq(true))
            .order_by_asc(tenant_provider_binding::Column::Id)
            .all(&*self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(binding, provider)| provider.map(|p| (binding, p)))
            .collect())
    }

    /// Distinct tenants that have at least one syncable binding
    pub async fn tenants_with_syncable_bindings(&self) -> Result<Vec<i64>, DbErr> {
        TenantProviderBinding::find()
            .select_only()
            .column(tenant_provider_binding::Column::TenantId)
            .distinct()
            .inner_join(Provider)
            .filter(tenant_provider_binding::Column::IsEnabled.eq(true))
            .filter(provider::Column::IsActive.eq(true))
            .order_by_asc(tenant_provider_binding::Column::TenantId)
            .into_tuple::<i64>()
            .all(&*self.db)
            .await
    }

    /// Every enabled binding on an active provider, across tenants
    pub async fn list_all_syncable(
        &self,
    ) -> Result<Vec<(tenant_provider_binding::Model, provider::Model)>, DbErr> {
        let rows = TenantProviderBinding::find()
            .find_also_related(Provider)
            .filter(tenant_provider_binding::Column::IsEnabled.eq(true))
            .filter(provider::Column::IsActive.eq(true))
            .order_by_asc(tenant_provider_binding::Column::TenantId)
            .order_by_asc(tenant_provider_binding::Column::Id)
            .all(&*self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(binding, provider)| provider.map(|p| (binding, p)))
            .collect())
    }

    pub async fn insert(
        &self,
        tenant_id: i64,
        provider_id: i32,
        encrypted_config: Option<String>,
        is_enabled: bool,
    ) -> Result<tenant_provider_binding::Model, DbErr> {
        let now = Utc::now().into();
        let active = tenant_provider_binding::ActiveModel {
            tenant_id: Set(tenant_id),
            provider_id: Set(provider_id),
            encrypted_config: Set(encrypted_config),
            is_enabled: Set(is_enabled),
            last_sync_watermark: Set(None),
            last_sync_status: Set(None),
            last_sync_error: Set(None),
            last_sync_attempt_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        active.insert(&*self.db).await
    }

    pub async fn update(
        &self,
        binding: tenant_provider_binding::Model,
        update: BindingUpdate,
    ) -> Result<tenant_provider_binding::Model, DbErr> {
        let mut active: tenant_provider_binding::ActiveModel = binding.into();
        if let Some(encrypted_config) = update.encrypted_config {
            active.encrypted_config = Set(encrypted_config);
        }
        if let Some(is_enabled) = update.is_enabled {
            active.is_enabled = Set(is_enabled);
        }
        if let Some(watermark) = update.last_sync_watermark {
            active.last_sync_watermark = Set(watermark);
        }
        active.updated_at = Set(Utc::now().into());
        active.update(&*self.db).await
    }

    /// Deletes the binding; returns whether a row was removed
    pub async fn delete(&self, tenant_id: i64, provider_id: i32) -> Result<bool, DbErr> {
        let result = TenantProviderBinding::delete_many()
            .filter(tenant_provider_binding::Column::TenantId.eq(tenant_id))
            .filter(tenant_provider_binding::Column::ProviderId.eq(provider_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Records a successful sync and advances the watermark, in one row write.
    pub async fn record_success(
        &self,
        binding_id: i32,
        watermark: DateTime<Utc>,
    ) -> Result<(), DbErr> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let watermark: DateTimeWithTimeZone = watermark.into();
        TenantProviderBinding::update_many()
            .col_expr(
                tenant_provider_binding::Column::LastSyncWatermark,
                Expr::value(watermark),
            )
            .col_expr(
                tenant_provider_binding::Column::LastSyncStatus,
                Expr::value(SYNC_STATUS_SUCCESS),
            )
            .col_expr(
                tenant_provider_binding::Column::LastSyncError,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                tenant_provider_binding::Column::LastSyncAttemptAt,
                Expr::value(now),
            )
            .col_expr(tenant_provider_binding::Column::UpdatedAt, Expr::value(now))
            .filter(tenant_provider_binding::Column::Id.eq(binding_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Records a failed attempt. The watermark column is not written.
    pub async fn record_failure(&self, binding_id: i32, error: &str) -> Result<(), DbErr> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        TenantProviderBinding::update_many()
            .col_expr(
                tenant_provider_binding::Column::LastSyncStatus,
                Expr::value(SYNC_STATUS_FAILED),
            )
            .col_expr(
                tenant_provider_binding::Column::LastSyncError,
                Expr::value(error.to_string()),
            )
            .col_expr(
                tenant_provider_binding::Column::LastSyncAttemptAt,
                Expr::value(now),
            )
            .col_expr(tenant_provider_binding::Column::UpdatedAt, Expr::value(now))
            .filter(tenant_provider_binding::Column::Id.eq(binding_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}
