//! Provider entity model
//!
//! This module contains the SeaORM entity model for the providers table,
//! the global catalog of warehouse targets a tenant can bind to.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

/// Provider entity representing a warehouse target type instance
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "providers")]
pub struct Model {
    /// Auto-increment identifier
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Wire value of [`crate::connectors::ProviderType`], e.g. `BIGQUERY`
    pub provider_type: String,

    /// Human-readable provider name, also used in sync result keys
    pub name: String,

    pub description: Option<String>,

    /// Inactive providers are hidden from listings and reject new bindings
    pub is_active: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::tenant_provider_binding::Entity")]
    TenantProviderBinding,
}

impl Related<super::tenant_provider_binding::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TenantProviderBinding.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
