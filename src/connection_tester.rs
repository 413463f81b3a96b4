//! Connection tester
//!
//! Cheapest credential and reachability probe per binding. Authentication,
//! network and timeout failures are reported as `false`; only a binding that
//! cannot be resolved or opened is an error.

use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::connectors::ConnectorError;
use crate::error::SyncError;
use crate::provider_registry::{ProviderRegistry, SyncTarget};

/// Outcome of one probe in a sweep.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConnectionTestResult {
    pub tenant_id: i64,
    pub provider_id: i32,
    pub provider_key: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ConnectionTester {
    registry: ProviderRegistry,
    timeout: Duration,
}

impl ConnectionTester {
    pub fn new(registry: ProviderRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub async fn test_connection(&self, tenant_id: i64, provider_id: i32) -> Result<bool, SyncError> {
        let target = self.registry.resolve_target(tenant_id, provider_id).await?;
        self.test_target(&target).await
    }

    #[instrument(skip_all, fields(tenant_id = target.tenant_id(), provider_id = target.provider_id(), binding_id = target.binding.id))]
    pub async fn test_target(&self, target: &SyncTarget) -> Result<bool, SyncError> {
        let config = self.registry.open_config(target)?;
        let connector = self
            .registry
            .vault()
            .registry()
            .get(target.provider_type)
            .map_err(|e| SyncError::UnknownProvider(e.to_string()))?;

        let success =
            match tokio::time::timeout(self.timeout, connector.test_connection(&config)).await {
                Ok(Ok(reachable)) => reachable,
                Ok(Err(ConnectorError::ConfigurationError { details })) => {
                    return Err(SyncError::validation(details));
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Connection test failed");
                    false
                }
                Err(_) => {
                    warn!(timeout_secs = self.timeout.as_secs(), "Connection test timed out");
                    false
                }
            };

        let outcome = if success { "success" } else { "failure" };
        counter!(
            "datasync_connection_tests_total",
            "provider" => target.provider_type.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        Ok(success)
    }

    /// Probes every enabled binding across tenants. Never fails per target.
    pub async fn test_all_connections(&self) -> Result<Vec<ConnectionTestResult>, SyncError> {
        let targets = self.registry.all_syncable_targets().await?;
        let mut results = Vec::with_capacity(targets.len());

        for target in &targets {
            let (success, error) = match self.test_target(target).await {
                Ok(true) => (true, None),
                Ok(false) => (false, Some("connection test failed".to_string())),
                Err(e) => (false, Some(e.to_string())),
            };
            results.push(ConnectionTestResult {
                tenant_id: target.tenant_id(),
                provider_id: target.provider_id(),
                provider_key: target.key(),
                success,
                error,
            });
        }

        let passed = results.iter().filter(|r| r.success).count();
        info!(passed, total = results.len(), "Connection test sweep finished");
        Ok(results)
    }
}
