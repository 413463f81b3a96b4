//! Provider registry
//!
//! Strategy table mapping each [`ProviderType`] to its connector. Built once
//! at startup and passed around explicitly.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::connectors::bigquery::BigQueryConnector;
use crate::connectors::{Connector, ProviderMetadata, ProviderType};

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Provider '{name}' not found")]
    ProviderNotFound { name: String },
    #[error("Provider '{name}' could not be initialized: {details}")]
    InitializationFailed { name: String, details: String },
}

/// Connectors keyed by provider type
#[derive(Clone, Default)]
pub struct Registry {
    connectors: BTreeMap<ProviderType, Arc<dyn Connector>>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in connector, configured from `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        let bigquery = BigQueryConnector::new(&config.bigquery).map_err(|e| {
            RegistryError::InitializationFailed {
                name: ProviderType::BigQuery.to_string(),
                details: e.to_string(),
            }
        })?;
        registry.register(Arc::new(bigquery));
        Ok(registry)
    }

    /// Register a connector under its own provider type, replacing any previous one
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.provider_type(), connector);
    }

    pub fn get(&self, provider_type: ProviderType) -> Result<Arc<dyn Connector>, RegistryError> {
        self.connectors
            .get(&provider_type)
            .cloned()
            .ok_or_else(|| RegistryError::ProviderNotFound {
                name: provider_type.to_string(),
            })
    }

    /// Look up by the stored wire value (e.g. `"BIGQUERY"`)
    pub fn get_by_name(&self, name: &str) -> Result<Arc<dyn Connector>, RegistryError> {
        let provider_type =
            name.parse::<ProviderType>()
                .map_err(|_| RegistryError::ProviderNotFound {
                    name: name.to_string(),
                })?;
        self.get(provider_type)
    }

    /// Metadata for all registered providers, in provider type order
    pub fn list_metadata(&self) -> Vec<ProviderMetadata> {
        self.connectors.values().map(|c| c.metadata()).collect()
    }
}
