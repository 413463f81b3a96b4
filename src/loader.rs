//! Loader
//!
//! Hands an extracted dataset to the provider's connector under a time bound
//! and checks that every extracted row was written.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tracing::{info, instrument, warn};

use crate::connectors::{LoadOutcome, Registry};
use crate::error::SyncError;
use crate::extractor::ExtractedDataset;
use crate::vault::ValidatedConfig;

#[derive(Clone)]
pub struct Loader {
    registry: Arc<Registry>,
    timeout: Duration,
}

impl Loader {
    pub fn new(registry: Arc<Registry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Writes `dataset` to the provider named by `config`.
    ///
    /// Connector failures, timeouts and count drift all come back as errors;
    /// the caller owns the watermark.
    #[instrument(skip_all, fields(tenant_id = dataset.tenant_id(), provider = %config.provider_type()))]
    pub async fn load(
        &self,
        dataset: &ExtractedDataset,
        config: &ValidatedConfig,
    ) -> Result<LoadOutcome, SyncError> {
        let provider_type = config.provider_type();
        let connector = self
            .registry
            .get(provider_type)
            .map_err(|e| SyncError::UnknownProvider(e.to_string()))?;

        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, connector.load(dataset, config)).await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "Provider load timed out"
                );
                return Err(SyncError::Load(format!(
                    "load timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        check_drift(&dataset.record_counts(), &outcome.loaded_counts)?;

        histogram!("datasync_load_duration_seconds", "provider" => provider_type.as_str())
            .record(started.elapsed().as_secs_f64());
        info!(
            records_exported = outcome.records_exported,
            tables_created = outcome.tables_created.len(),
            tables_updated = outcome.tables_updated.len(),
            "Load finished"
        );
        Ok(outcome)
    }
}

/// Every extracted table must report exactly as many loaded rows.
fn check_drift(
    expected: &BTreeMap<String, u64>,
    loaded: &BTreeMap<String, u64>,
) -> Result<(), SyncError> {
    let drifted: Vec<String> = expected
        .iter()
        .filter_map(|(table, &want)| {
            let got = loaded.get(table).copied().unwrap_or(0);
            (got != want).then(|| format!("{} (extracted {}, loaded {})", table, want, got))
        })
        .collect();

    if drifted.is_empty() {
        return Ok(());
    }
    counter!("datasync_load_drift_total").increment(1);
    Err(SyncError::Load(format!(
        "record count drift: {}",
        drifted.join(", ")
    )))
}
