//! Provider and binding registry
//!
//! CRUD over providers and tenant bindings. Every credential write goes
//! through [`ConfigVault::seal`]; listings never carry the config, and the
//! decrypted form is only handed to the sync and connection-test paths.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::connectors::ProviderType;
use crate::error::{SyncError, is_unique_violation};
use crate::models::provider;
use crate::models::tenant_provider_binding::{self, SYNC_STATUS_FAILED};
use crate::repositories::{BindingRepository, BindingUpdate, ProviderPatch, ProviderRepository};
use crate::vault::{ConfigVault, ValidatedConfig};

/// Sync state of a binding as reported by the status API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    NeverSynced,
    Success,
    Failed,
}

impl SyncStatus {
    pub fn of(binding: &tenant_provider_binding::Model) -> Self {
        if binding.last_sync_status.as_deref() == Some(SYNC_STATUS_FAILED) {
            SyncStatus::Failed
        } else if binding.last_sync_watermark.is_none() && binding.last_sync_status.is_none() {
            SyncStatus::NeverSynced
        } else {
            SyncStatus::Success
        }
    }
}

/// Public view of a binding. Never includes the config.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BindingView {
    pub id: i32,
    pub tenant_id: i64,
    pub provider_id: i32,
    pub provider_name: Option<String>,
    pub provider_type: Option<String>,
    pub is_enabled: bool,
    /// Whether credentials are stored
    pub has_config: bool,
    pub last_sync_watermark: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BindingView {
    fn new(binding: &tenant_provider_binding::Model, provider: Option<&provider::Model>) -> Self {
        Self {
            id: binding.id,
            tenant_id: binding.tenant_id,
            provider_id: binding.provider_id,
            provider_name: provider.map(|p| p.name.clone()),
            provider_type: provider.map(|p| p.provider_type.clone()),
            is_enabled: binding.is_enabled,
            has_config: binding.encrypted_config.is_some(),
            last_sync_watermark: binding.last_sync_watermark.map(|w| w.with_timezone(&Utc)),
            created_at: binding.created_at.with_timezone(&Utc),
            updated_at: binding.updated_at.with_timezone(&Utc),
        }
    }
}

/// Per-binding sync status
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BindingStatus {
    pub provider_id: i32,
    pub provider_name: String,
    pub provider_type: String,
    pub is_enabled: bool,
    pub last_sync_watermark: Option<DateTime<Utc>>,
    pub sync_status: SyncStatus,
    pub error_message: Option<String>,
}

/// Requested changes to a binding.
#[derive(Debug, Clone, Default)]
pub struct BindingPatch {
    /// Replacement credentials; validated and sealed like on create
    pub config: Option<Value>,
    pub is_enabled: Option<bool>,
    /// New watermark; must not move backwards
    pub last_sync_watermark: Option<DateTime<Utc>>,
}

/// A binding resolved together with its provider, ready to sync.
#[derive(Debug, Clone)]
pub struct SyncTarget {
    pub binding: tenant_provider_binding::Model,
    pub provider: provider::Model,
    pub provider_type: ProviderType,
}

impl SyncTarget {
    fn new(
        binding: tenant_provider_binding::Model,
        provider: provider::Model,
    ) -> Result<Self, SyncError> {
        let provider_type = parse_provider_type(&provider)?;
        Ok(Self {
            binding,
            provider,
            provider_type,
        })
    }

    pub fn tenant_id(&self) -> i64 {
        self.binding.tenant_id
    }

    pub fn provider_id(&self) -> i32 {
        self.provider.id
    }

    /// Result-map key: `<provider name>_<binding id>`
    pub fn key(&self) -> String {
        format!("{}_{}", self.provider.name, self.binding.id)
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.binding
            .last_sync_watermark
            .map(|w| w.with_timezone(&Utc))
    }
}

#[derive(Clone)]
pub struct ProviderRegistry {
    providers: ProviderRepository,
    bindings: BindingRepository,
    vault: ConfigVault,
}

impl ProviderRegistry {
    pub fn new(db: Arc<DatabaseConnection>, vault: ConfigVault) -> Self {
        Self {
            providers: ProviderRepository::new(db.clone()),
            bindings: BindingRepository::new(db),
            vault,
        }
    }

    pub fn vault(&self) -> &ConfigVault {
        &self.vault
    }

    // Providers

    pub async fn list_providers(
        &self,
        include_inactive: bool,
    ) -> Result<Vec<provider::Model>, SyncError> {
        Ok(self.providers.list(include_inactive).await?)
    }

    pub async fn get_provider(&self, id: i32) -> Result<provider::Model, SyncError> {
        self.providers
            .find_by_id(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("provider {}", id)))
    }

    /// Creates a provider of a type some connector implements.
    pub async fn create_provider(
        &self,
        provider_type: &str,
        name: &str,
        description: Option<String>,
    ) -> Result<provider::Model, SyncError> {
        let provider_type: ProviderType = provider_type
            .parse()
            .map_err(|_| SyncError::UnknownProvider(provider_type.to_string()))?;
        self.vault
            .registry()
            .get(provider_type)
            .map_err(|e| SyncError::UnknownProvider(e.to_string()))?;

        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::ConfigValidation {
                message: "provider name must not be empty".to_string(),
                fields: vec!["name".to_string()],
            });
        }

        let created = self
            .providers
            .create(provider_type, name, description)
            .await?;
        info!(provider_id = created.id, provider_type = %provider_type, "Created provider");
        Ok(created)
    }

    pub async fn update_provider(
        &self,
        id: i32,
        patch: ProviderPatch,
    ) -> Result<provider::Model, SyncError> {
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(SyncError::ConfigValidation {
                message: "provider name must not be empty".to_string(),
                fields: vec!["name".to_string()],
            });
        }
        self.providers
            .update(id, patch)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("provider {}", id)))
    }

    /// Hides the provider from new bindings and from sync; history stays.
    pub async fn deactivate_provider(&self, id: i32) -> Result<provider::Model, SyncError> {
        let provider = self
            .providers
            .deactivate(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("provider {}", id)))?;
        info!(provider_id = id, "Deactivated provider");
        Ok(provider)
    }

    // Bindings

    async fn active_provider(&self, provider_id: i32) -> Result<provider::Model, SyncError> {
        match self.providers.find_by_id(provider_id).await? {
            Some(p) if p.is_active => Ok(p),
            Some(_) => Err(SyncError::UnknownProvider(format!(
                "provider {} is inactive",
                provider_id
            ))),
            None => Err(SyncError::UnknownProvider(format!(
                "provider {} does not exist",
                provider_id
            ))),
        }
    }

    /// Creates the tenant's binding to `provider_id`, sealing `raw_config` when given.
    pub async fn create_binding(
        &self,
        tenant_id: i64,
        provider_id: i32,
        raw_config: Option<&Value>,
        enabled: bool,
    ) -> Result<BindingView, SyncError> {
        let provider = self.active_provider(provider_id).await?;
        let provider_type = parse_provider_type(&provider)?;

        if self.bindings.find(tenant_id, provider_id).await?.is_some() {
            return Err(SyncError::DuplicateBinding {
                tenant_id,
                provider_id,
            });
        }

        let encrypted = raw_config
            .map(|raw| self.vault.seal(tenant_id, provider_id, provider_type, raw))
            .transpose()?;

        let binding = self
            .bindings
            .insert(tenant_id, provider_id, encrypted, enabled)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    SyncError::DuplicateBinding {
                        tenant_id,
                        provider_id,
                    }
                } else {
                    SyncError::Database(e)
                }
            })?;

        info!(
            tenant_id,
            provider_id,
            binding_id = binding.id,
            enabled,
            "Created provider binding"
        );
        Ok(BindingView::new(&binding, Some(&provider)))
    }

    pub async fn update_binding(
        &self,
        tenant_id: i64,
        provider_id: i32,
        patch: BindingPatch,
    ) -> Result<BindingView, SyncError> {
        let binding = self.find_binding(tenant_id, provider_id).await?;
        let provider = self.providers.find_by_id(provider_id).await?;

        let mut update = BindingUpdate {
            is_enabled: patch.is_enabled,
            ..Default::default()
        };

        if let Some(raw) = &patch.config {
            let provider = provider
                .as_ref()
                .ok_or_else(|| SyncError::UnknownProvider(provider_id.to_string()))?;
            let provider_type = parse_provider_type(provider)?;
            update.encrypted_config =
                Some(Some(self.vault.seal(tenant_id, provider_id, provider_type, raw)?));
        }

        if let Some(watermark) = patch.last_sync_watermark {
            let current = binding.last_sync_watermark.map(|w| w.with_timezone(&Utc));
            if current.is_some_and(|c| watermark < c) {
                return Err(SyncError::ConfigValidation {
                    message: "last_sync_watermark cannot move backwards".to_string(),
                    fields: vec!["last_sync_watermark".to_string()],
                });
            }
            update.last_sync_watermark = Some(Some(watermark.into()));
        }

        let updated = self.bindings.update(binding, update).await?;
        debug!(tenant_id, provider_id, "Updated provider binding");
        Ok(BindingView::new(&updated, provider.as_ref()))
    }

    pub async fn delete_binding(&self, tenant_id: i64, provider_id: i32) -> Result<(), SyncError> {
        if self.bindings.delete(tenant_id, provider_id).await? {
            info!(tenant_id, provider_id, "Deleted provider binding");
            Ok(())
        } else {
            Err(binding_not_found(tenant_id, provider_id))
        }
    }

    pub async fn list_bindings_for_tenant(
        &self,
        tenant_id: i64,
    ) -> Result<Vec<BindingView>, SyncError> {
        let rows = self.bindings.list_for_tenant(tenant_id).await?;
        Ok(rows
            .iter()
            .map(|(binding, provider)| BindingView::new(binding, provider.as_ref()))
            .collect())
    }

    pub async fn binding_statuses(&self, tenant_id: i64) -> Result<Vec<BindingStatus>, SyncError> {
        let rows = self.bindings.list_for_tenant(tenant_id).await?;
        Ok(rows
            .into_iter()
            .filter_map(|(binding, provider)| {
                let provider = provider?;
                Some(BindingStatus {
                    provider_id: provider.id,
                    provider_name: provider.name,
                    provider_type: provider.provider_type,
                    is_enabled: binding.is_enabled,
                    last_sync_watermark: binding
                        .last_sync_watermark
                        .map(|w| w.with_timezone(&Utc)),
                    sync_status: SyncStatus::of(&binding),
                    error_message: binding.last_sync_error,
                })
            })
            .collect())
    }

    // Sync support

    async fn find_binding(
        &self,
        tenant_id: i64,
        provider_id: i32,
    ) -> Result<tenant_provider_binding::Model, SyncError> {
        self.bindings
            .find(tenant_id, provider_id)
            .await?
            .ok_or_else(|| binding_not_found(tenant_id, provider_id))
    }

    /// The tenant's binding to `provider_id` with its provider.
    pub async fn resolve_target(
        &self,
        tenant_id: i64,
        provider_id: i32,
    ) -> Result<SyncTarget, SyncError> {
        let binding = self.find_binding(tenant_id, provider_id).await?;
        let provider = self.get_provider(provider_id).await?;
        SyncTarget::new(binding, provider)
    }

    /// Enabled bindings of `tenant_id` on active providers.
    ///
    /// A binding whose provider type has no connector is skipped with a warning.
    pub async fn syncable_targets(&self, tenant_id: i64) -> Result<Vec<SyncTarget>, SyncError> {
        let rows = self.bindings.list_syncable(tenant_id).await?;
        Ok(collect_targets(rows))
    }

    pub async fn all_syncable_targets(&self) -> Result<Vec<SyncTarget>, SyncError> {
        let rows = self.bindings.list_all_syncable().await?;
        Ok(collect_targets(rows))
    }

    pub async fn tenants_with_syncable_bindings(&self) -> Result<Vec<i64>, SyncError> {
        Ok(self.bindings.tenants_with_syncable_bindings().await?)
    }

    /// Decrypts the target's config for immediate use.
    pub(crate) fn open_config(&self, target: &SyncTarget) -> Result<ValidatedConfig, SyncError> {
        let ciphertext = target.binding.encrypted_config.as_deref().ok_or_else(|| {
            SyncError::validation(format!(
                "binding {} has no stored configuration",
                target.binding.id
            ))
        })?;
        self.vault.open(
            target.tenant_id(),
            target.provider_id(),
            target.provider_type,
            ciphertext,
        )
    }

    pub(crate) async fn record_success(
        &self,
        target: &SyncTarget,
        watermark: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        Ok(self
            .bindings
            .record_success(target.binding.id, watermark)
            .await?)
    }

    pub(crate) async fn record_failure(
        &self,
        target: &SyncTarget,
        error: &str,
    ) -> Result<(), SyncError> {
        Ok(self
            .bindings
            .record_failure(target.binding.id, error)
            .await?)
    }
}

fn collect_targets(rows: Vec<(tenant_provider_binding::Model, provider::Model)>) -> Vec<SyncTarget> {
    rows.into_iter()
        .filter_map(|(binding, provider)| {
            let binding_id = binding.id;
            match SyncTarget::new(binding, provider) {
                Ok(target) => Some(target),
                Err(e) => {
                    warn!(binding_id, error = %e, "Skipping binding with unsupported provider type");
                    None
                }
            }
        })
        .collect()
}

fn parse_provider_type(provider: &provider::Model) -> Result<ProviderType, SyncError> {
    provider
        .provider_type
        .parse()
        .map_err(|_| SyncError::UnknownProvider(provider.provider_type.clone()))
}

fn binding_not_found(tenant_id: i64, provider_id: i32) -> SyncError {
    SyncError::NotFound(format!(
        "binding for tenant {} and provider {}",
        tenant_id, provider_id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn binding(
        watermark: Option<DateTime<Utc>>,
        status: Option<&str>,
    ) -> tenant_provider_binding::Model {
        let now = Utc::now().into();
        tenant_provider_binding::Model {
            id: 1,
            tenant_id: 7,
            provider_id: 2,
            encrypted_config: None,
            is_enabled: true,
            last_sync_watermark: watermark.map(Into::into),
            last_sync_status: status.map(str::to_string),
            last_sync_error: None,
            last_sync_attempt_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn sync_status_reflects_last_attempt() {
        let w = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(SyncStatus::of(&binding(None, None)), SyncStatus::NeverSynced);
        assert_eq!(
            SyncStatus::of(&binding(Some(w), Some("success"))),
            SyncStatus::Success
        );
        assert_eq!(
            SyncStatus::of(&binding(Some(w), Some("failed"))),
            SyncStatus::Failed
        );
        assert_eq!(SyncStatus::of(&binding(None, Some("failed"))), SyncStatus::Failed);
    }

    #[test]
    fn target_key_uses_provider_name_and_binding_id() {
        let now = Utc::now().into();
        let provider = provider::Model {
            id: 2,
            provider_type: "BIGQUERY".to_string(),
            name: "bigquery".to_string(),
            description: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let target = SyncTarget::new(binding(None, None), provider).unwrap();
        assert_eq!(target.key(), "bigquery_1");
        assert_eq!(target.provider_type, ProviderType::BigQuery);
        assert!(target.watermark().is_none());
    }
}
