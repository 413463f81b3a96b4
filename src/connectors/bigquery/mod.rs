//! BigQuery warehouse connector
//!
//! Each tenant exports into its own dataset (`<dataset_id>_<tenant_id>`,
//! enforced by the vault). Tables are created on first sight and then
//! truncated or appended to according to the extraction mode.

pub mod client;
pub mod config;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::config::BigQueryApiConfig;
use crate::connectors::{
    Connector, ConnectorError, LoadOutcome, ProviderMetadata, ProviderType,
};
use crate::error::SyncError;
use crate::extractor::{ExtractMode, ExtractedDataset, Row};
use crate::vault::ValidatedConfig;

pub use client::{BigQueryClient, WriteDisposition};
pub use config::BigQueryConfig;

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub struct BigQueryConnector {
    http: Client,
    api_base: String,
    poll_interval: Duration,
}

impl BigQueryConnector {
    /// Every request through the connector is bounded by [`HTTP_TIMEOUT`].
    pub fn new(api: &BigQueryApiConfig) -> Result<Self, ConnectorError> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ConnectorError::ConfigurationError {
                details: format!("cannot build HTTP client: {}", e),
            })?;
        Ok(Self {
            http,
            api_base: api.api_base.clone(),
            poll_interval: Duration::from_millis(api.job_poll_interval_ms),
        })
    }

    async fn client(&self, config: &BigQueryConfig) -> Result<BigQueryClient, ConnectorError> {
        BigQueryClient::authenticate(
            self.http.clone(),
            &self.api_base,
            config,
            self.poll_interval,
        )
        .await
    }
}

#[async_trait]
impl Connector for BigQueryConnector {
    fn provider_type(&self) -> ProviderType {
        ProviderType::BigQuery
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            provider_type: ProviderType::BigQuery,
            display_name: "Google BigQuery".to_string(),
            required_fields: config::REQUIRED_FIELDS
                .iter()
                .map(|f| f.to_string())
                .collect(),
            optional_fields: config::OPTIONAL_FIELDS
                .iter()
                .map(|f| f.to_string())
                .collect(),
            namespace_field: self.namespace_field().map(str::to_string),
        }
    }

    fn validate_config(&self, raw: &Value) -> Result<Value, SyncError> {
        let config = BigQueryConfig::validate(raw)?;
        serde_json::to_value(&config)
            .map_err(|e| SyncError::validation(format!("config could not be encoded: {}", e)))
    }

    fn namespace_field(&self) -> Option<&'static str> {
        Some("dataset_id")
    }

    async fn test_connection(&self, config: &ValidatedConfig) -> Result<bool, ConnectorError> {
        let config = BigQueryConfig::from_json(config.as_json())?;
        let client = self.client(&config).await?;
        client.select_one().await
    }

    #[instrument(skip_all, fields(tenant_id = dataset.tenant_id()))]
    async fn load(
        &self,
        dataset: &ExtractedDataset,
        config: &ValidatedConfig,
    ) -> Result<LoadOutcome, ConnectorError> {
        let config = BigQueryConfig::from_json(config.as_json())?;
        let client = self.client(&config).await?;
        let dataset_id = config.dataset_id.as_str();
        let batch_size = config.sync_settings.batch_size.max(1);

        client
            .ensure_dataset(dataset_id, dataset.tenant_id())
            .await?;
        client
            .ensure_table(
                dataset_id,
                client::SYNC_METADATA_TABLE,
                &client::sync_metadata_schema(),
            )
            .await?;

        let mut outcome = LoadOutcome::default();
        for table in dataset.tables() {
            let table_id = config.table_name(&table.name);
            let created = client
                .ensure_table(dataset_id, &table_id, &table.schema)
                .await?;

            // A full pass replaces the table even when nothing was extracted.
            if table.rows.is_empty() && !created && dataset.mode() == ExtractMode::Full {
                client.truncate_table(dataset_id, &table_id).await?;
            }

            let mut loaded = 0u64;
            for (index, chunk) in table.rows.chunks(batch_size).enumerate() {
                let disposition = match dataset.mode() {
                    ExtractMode::Full if index == 0 => WriteDisposition::Truncate,
                    _ => WriteDisposition::Append,
                };
                loaded += client
                    .load_rows(dataset_id, &table_id, &table.schema, chunk, disposition)
                    .await?;
            }

            client
                .record_table_sync(
                    dataset_id,
                    &table_id,
                    dataset.extracted_at(),
                    max_id(&table.rows),
                )
                .await?;

            debug!(table = %table_id, rows = loaded, created, "Table loaded");
            if created {
                outcome.tables_created.push(table_id);
            } else {
                outcome.tables_updated.push(table_id);
            }
            outcome.records_exported += loaded;
            outcome.loaded_counts.insert(table.name.clone(), loaded);
        }

        info!(
            dataset_id,
            records = outcome.records_exported,
            created = outcome.tables_created.len(),
            updated = outcome.tables_updated.len(),
            "BigQuery load complete"
        );
        Ok(outcome)
    }
}

fn max_id(rows: &[Row]) -> Option<i64> {
    rows.iter()
        .filter_map(|row| row.get("id").and_then(Value::as_i64))
        .max()
}
