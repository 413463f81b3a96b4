//! Tenant provider binding entity model
//!
//! One row per `(tenant_id, provider_id)` pair. The credential column holds
//! vault ciphertext only; nothing in this module can read it.

use super::provider::Entity as Provider;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

/// Outcome of the most recent sync attempt, stored as text
pub const SYNC_STATUS_SUCCESS: &str = "success";
pub const SYNC_STATUS_FAILED: &str = "failed";

/// Binding between a tenant and a provider
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tenant_provider_bindings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Tenant (organization) identifier
    pub tenant_id: i64,

    pub provider_id: i32,

    /// Base64 AES-256-GCM token produced by the config vault
    #[sea_orm(column_type = "Text", nullable)]
    pub encrypted_config: Option<String>,

    pub is_enabled: bool,

    /// Extraction start time of the last successful sync; only moves forward
    pub last_sync_watermark: Option<DateTimeWithTimeZone>,

    /// `success` or `failed` for the most recent attempt
    pub last_sync_status: Option<String>,

    pub last_sync_error: Option<String>,

    pub last_sync_attempt_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Provider",
        from = "Column::ProviderId",
        to = "super::provider::Column::Id"
    )]
    Provider,
}

impl Related<Provider> for Entity {
    fn to() -> RelationDef {
        Relation::Provider.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
