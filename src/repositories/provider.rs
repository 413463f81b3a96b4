//! Provider repository for database operations
//!
//! SeaORM operations for the global provider catalog.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;

use crate::connectors::ProviderType;
use crate::models::provider::{self, Entity as Provider};

/// Fields a provider update may change; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ProviderPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub is_active: Option<bool>,
}

/// Repository for provider database operations
#[derive(Debug, Clone)]
pub struct ProviderRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl ProviderRepository {
    /// Creates a new ProviderRepository instance
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<provider::Model>, DbErr> {
        Provider::find_by_id(id).one(&*self.db).await
    }

    /// Finds a provider by display name
    pub async fn find_by_name(&self, name: &str) -> Result<Option<provider::Model>, DbErr> {
        Provider::find()
            .filter(provider::Column::Name.eq(name))
            .one(&*self.db)
            .await
    }

    /// Lists providers ordered by id; inactive ones only when `include_inactive`
    pub async fn list(&self, include_inactive: bool) -> Result<Vec<provider::Model>, DbErr> {
        let mut query = Provider::find();
        if !include_inactive {
            query = query.filter(provider::Column::IsActive.eq(true));
        }
        query
            .order_by_asc(provider::Column::Id)
            .all(&*self.db)
            .await
    }

    /// Creates a new, active provider
    pub async fn create(
        &self,
        provider_type: ProviderType,
        name: &str,
        description: Option<String>,
    ) -> Result<provider::Model, DbErr> {
        let now = Utc::now().into();
        let active = provider::ActiveModel {
            provider_type: Set(provider_type.as_str().to_string()),
            name: Set(name.to_string()),
            description: Set(description),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        active.insert(&*self.db).await
    }

    /// Applies `patch` to provider `id`. Returns `None` if it does not exist.
    pub async fn update(
        &self,
        id: i32,
        patch: ProviderPatch,
    ) -> Result<Option<provider::Model>, DbErr> {
        let Some(existing) = self.find_by_id(id).await? else {
            return Ok(None);
        };

        let mut active: provider::ActiveModel = existing.into();
        if let Some(name) = patch.name {
            active.name = Set(name);
        }
        if let Some(description) = patch.description {
            active.description = Set(description);
        }
        if let Some(is_active) = patch.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Utc::now().into());

        active.update(&*self.db).await.map(Some)
    }

    /// Marks the provider inactive; bindings and their history are kept.
    pub async fn deactivate(&self, id: i32) -> Result<Option<provider::Model>, DbErr> {
        self.update(
            id,
            ProviderPatch {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
    }
}
