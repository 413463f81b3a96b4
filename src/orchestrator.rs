//! Sync orchestration
//!
//! Sequences extraction, load and watermark update for each
//! `(tenant, provider)` target. Per-target failures are captured into a
//! [`SyncResult`]; only metadata store failures escape.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

use crate::connection_tester::{ConnectionTestResult, ConnectionTester};
use crate::connectors::LoadOutcome;
use crate::error::SyncError;
use crate::extractor::{ExtractMode, Extractor};
use crate::loader::Loader;
use crate::provider_registry::{ProviderRegistry, SyncTarget};

/// Result-map key used when a whole tenant could not be synced.
pub const TENANT_ERROR_KEY: &str = "error";

/// Outcome of one `(tenant, provider)` sync attempt. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SyncResult {
    pub success: bool,
    pub records_exported: u64,
    pub tables_created: Vec<String>,
    pub tables_updated: Vec<String>,
    pub error_message: Option<String>,
    pub sync_timestamp: DateTime<Utc>,
}

impl SyncResult {
    pub fn succeeded(outcome: LoadOutcome) -> Self {
        Self {
            success: true,
            records_exported: outcome.records_exported,
            tables_created: outcome.tables_created,
            tables_updated: outcome.tables_updated,
            error_message: None,
            sync_timestamp: Utc::now(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            records_exported: 0,
            tables_created: Vec::new(),
            tables_updated: Vec::new(),
            error_message: Some(message.into()),
            sync_timestamp: Utc::now(),
        }
    }
}

/// Results of one tenant, keyed by `<provider name>_<binding id>`.
pub type TenantResults = BTreeMap<String, SyncResult>;

#[derive(Clone)]
pub struct SyncOrchestrator {
    registry: ProviderRegistry,
    extractor: Extractor,
    loader: Loader,
    tester: ConnectionTester,
    tenant_concurrency: usize,
}

impl SyncOrchestrator {
    pub fn new(
        registry: ProviderRegistry,
        extractor: Extractor,
        loader: Loader,
        tester: ConnectionTester,
    ) -> Self {
        Self {
            registry,
            extractor,
            loader,
            tester,
            tenant_concurrency: 1,
        }
    }

    /// Number of tenants synced at once by [`SyncOrchestrator::sync_all`]
    pub fn with_tenant_concurrency(mut self, tenant_concurrency: usize) -> Self {
        self.tenant_concurrency = tenant_concurrency.max(1);
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub async fn test_connection(&self, tenant_id: i64, provider_id: i32) -> Result<bool, SyncError> {
        self.tester.test_connection(tenant_id, provider_id).await
    }

    pub async fn test_all_connections(&self) -> Result<Vec<ConnectionTestResult>, SyncError> {
        self.tester.test_all_connections().await
    }

    /// Syncs one binding. Errors only when the binding cannot be resolved or
    /// its provider has been deactivated.
    pub async fn sync_one(
        &self,
        tenant_id: i64,
        provider_id: i32,
        incremental: bool,
    ) -> Result<SyncResult, SyncError> {
        let target = self.registry.resolve_target(tenant_id, provider_id).await?;
        if !target.provider.is_active {
            return Err(SyncError::UnknownProvider(format!(
                "provider {} is inactive",
                provider_id
            )));
        }
        if !target.binding.is_enabled {
            return Ok(SyncResult::failed("provider binding is disabled"));
        }
        Ok(self
            .sync_target(&target, ExtractMode::from_incremental(incremental))
            .await)
    }

    /// Syncs every enabled binding of `tenant_id`.
    pub async fn sync_tenant(
        &self,
        tenant_id: i64,
        incremental: bool,
    ) -> Result<TenantResults, SyncError> {
        let targets = self.registry.syncable_targets(tenant_id).await?;
        let mode = ExtractMode::from_incremental(incremental);

        let mut results = TenantResults::new();
        for target in &targets {
            let result = self.sync_target(target, mode).await;
            results.insert(target.key(), result);
        }

        if !targets.is_empty() {
            let succeeded = results.values().filter(|r| r.success).count();
            info!(tenant_id, succeeded, total = results.len(), "Tenant sync finished");
        }
        Ok(results)
    }

    /// Syncs every tenant with an enabled binding.
    ///
    /// A tenant-level failure is reported under [`TENANT_ERROR_KEY`] and the
    /// remaining tenants still run.
    pub async fn sync_all(
        &self,
        incremental: bool,
    ) -> Result<BTreeMap<i64, TenantResults>, SyncError> {
        let tenants = self.registry.tenants_with_syncable_bindings().await?;
        info!(tenants = tenants.len(), incremental, "Starting sync for all tenants");

        let semaphore = Arc::new(Semaphore::new(self.tenant_concurrency));
        let mut handles = Vec::with_capacity(tenants.len());
        for tenant_id in tenants {
            let orchestrator = self.clone();
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| SyncError::Load("sync worker pool closed".to_string()))?;

            let handle = tokio::spawn(async move {
                let _permit = permit;
                orchestrator.sync_tenant(tenant_id, incremental).await
            });
            handles.push((tenant_id, handle));
        }

        let mut all = BTreeMap::new();
        for (tenant_id, handle) in handles {
            let results = match handle.await {
                Ok(Ok(results)) => results,
                Ok(Err(e)) => tenant_failure(tenant_id, &e.to_string()),
                Err(e) => tenant_failure(tenant_id, &e.to_string()),
            };
            all.insert(tenant_id, results);
        }
        Ok(all)
    }

    #[instrument(skip_all, fields(tenant_id = target.tenant_id(), provider_id = target.provider_id(), binding_id = target.binding.id))]
    async fn sync_target(&self, target: &SyncTarget, mode: ExtractMode) -> SyncResult {
        let started = Instant::now();
        let provider = target.provider_type.as_str();

        let result = match self.run(target, mode).await {
            Ok(result) => {
                info!(
                    records_exported = result.records_exported,
                    tables_created = result.tables_created.len(),
                    tables_updated = result.tables_updated.len(),
                    "Sync succeeded"
                );
                counter!("datasync_records_exported_total", "provider" => provider)
                    .increment(result.records_exported);
                result
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "Sync failed");
                if let Err(record_err) = self.registry.record_failure(target, &message).await {
                    error!(error = %record_err, "Could not record sync failure");
                }
                SyncResult::failed(message)
            }
        };

        let outcome = if result.success { "success" } else { "failure" };
        counter!("datasync_sync_total", "provider" => provider, "outcome" => outcome).increment(1);
        histogram!("datasync_sync_duration_seconds", "provider" => provider)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn run(&self, target: &SyncTarget, mode: ExtractMode) -> Result<SyncResult, SyncError> {
        let config = self.registry.open_config(target)?;
        let previous = target.watermark();

        let dataset = self
            .extractor
            .extract(target.tenant_id(), mode, previous)
            .await?;
        let outcome = self.loader.load(&dataset, &config).await?;

        let watermark = next_watermark(dataset.extracted_at(), previous);
        self.registry.record_success(target, watermark).await?;
        Ok(SyncResult::succeeded(outcome))
    }
}

/// The new watermark is the extraction start, and always later than the old one.
fn next_watermark(extracted_at: DateTime<Utc>, previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match previous {
        Some(previous) if previous >= extracted_at => previous + ChronoDuration::microseconds(1),
        _ => extracted_at,
    }
}

fn tenant_failure(tenant_id: i64, reason: &str) -> TenantResults {
    error!(tenant_id, error = %reason, "Tenant sync failed");
    let mut results = TenantResults::new();
    results.insert(
        TENANT_ERROR_KEY.to_string(),
        SyncResult::failed(format!("Tenant sync failed: {}", reason)),
    );
    results
}
