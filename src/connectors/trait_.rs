//! Connector trait definition
//!
//! Every provider type plugs in one [`Connector`]: it owns the credential
//! schema, the namespace key and the load strategy for that target.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::connectors::metadata::{ProviderMetadata, ProviderType};
use crate::error::SyncError;
use crate::extractor::ExtractedDataset;
use crate::vault::ValidatedConfig;

/// Connector-specific error types for structured error handling
#[derive(Debug, Clone)]
pub enum ConnectorError {
    /// Non-success HTTP status from the provider API
    HttpError { status: u16, body: Option<String> },
    /// Response did not have the expected shape
    MalformedResponse { details: String },
    /// Network or connectivity error
    NetworkError { details: String, retryable: bool },
    /// Credentials rejected or token exchange failed
    AuthenticationError {
        details: String,
        error_code: Option<String>,
    },
    /// Stored config cannot be used by this connector
    ConfigurationError { details: String },
    /// A warehouse job finished with an error result
    JobFailed { job_id: String, details: String },
}

impl ConnectorError {
    /// Whether the failure happened while reaching the provider rather than writing to it.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ConnectorError::NetworkError { .. } | ConnectorError::AuthenticationError { .. }
        )
    }
}

impl std::fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectorError::HttpError { status, body } => {
                write!(
                    f,
                    "HTTP error {}: {}",
                    status,
                    body.as_deref().unwrap_or("No body")
                )
            }
            ConnectorError::MalformedResponse { details } => {
                write!(f, "Malformed response: {}", details)
            }
            ConnectorError::NetworkError { details, .. } => {
                write!(f, "Network error: {}", details)
            }
            ConnectorError::AuthenticationError {
                details,
                error_code,
            } => {
                write!(f, "Authentication error: {}", details)?;
                if let Some(code) = error_code {
                    write!(f, " ({})", code)?;
                }
                Ok(())
            }
            ConnectorError::ConfigurationError { details } => {
                write!(f, "Configuration error: {}", details)
            }
            ConnectorError::JobFailed { job_id, details } => {
                write!(f, "Job {} failed: {}", job_id, details)
            }
        }
    }
}

impl std::error::Error for ConnectorError {}

impl From<ConnectorError> for SyncError {
    fn from(error: ConnectorError) -> Self {
        if error.is_connectivity() {
            SyncError::Connectivity(error.to_string())
        } else {
            SyncError::Load(error.to_string())
        }
    }
}

/// What a provider load wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Target tables that did not exist before this load
    pub tables_created: Vec<String>,
    /// Target tables that already existed
    pub tables_updated: Vec<String>,
    pub records_exported: u64,
    /// Rows written, keyed by logical table name
    pub loaded_counts: BTreeMap<String, u64>,
}

/// Load strategy and credential schema for one provider type.
#[async_trait]
pub trait Connector: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    fn metadata(&self) -> ProviderMetadata;

    /// Checks `raw` against the credential schema and returns the canonical
    /// config object with defaults filled in.
    fn validate_config(&self, raw: &Value) -> Result<Value, SyncError>;

    /// Config key holding the tenant namespace, if this provider has one.
    fn namespace_field(&self) -> Option<&'static str> {
        None
    }

    /// Cheapest credential and reachability probe the provider offers.
    async fn test_connection(&self, config: &ValidatedConfig) -> Result<bool, ConnectorError>;

    /// Writes every table of `dataset` into the tenant namespace.
    async fn load(
        &self,
        dataset: &ExtractedDataset,
        config: &ValidatedConfig,
    ) -> Result<LoadOutcome, ConnectorError>;
}
