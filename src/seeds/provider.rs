//! Provider seeding functionality
//!
//! Ensures a provider row exists for every built-in provider type.

use anyhow::Result;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::connectors::ProviderType;
use crate::repositories::ProviderRepository;

/// Default catalog entry for a provider type
struct ProviderSeed {
    provider_type: ProviderType,
    name: &'static str,
    description: &'static str,
}

const SEEDS: &[ProviderSeed] = &[ProviderSeed {
    provider_type: ProviderType::BigQuery,
    name: "bigquery",
    description: "Google BigQuery warehouse export",
}];

/// Creates missing seed providers, matched by name. Returns how many were created.
pub async fn seed_providers(db: &DatabaseConnection) -> Result<usize> {
    let repo = ProviderRepository::new(Arc::new(db.clone()));
    let mut created = 0;

    for seed in SEEDS {
        match repo.find_by_name(seed.name).await {
            Ok(Some(_)) => {
                log::info!("Provider '{}' already exists, skipping", seed.name);
            }
            Ok(None) => {
                log::info!("Creating provider: {}", seed.name);
                repo.create(
                    seed.provider_type,
                    seed.name,
                    Some(seed.description.to_string()),
                )
                .await
                .map_err(|e| {
                    log::error!("Failed to create provider '{}': {}", seed.name, e);
                    e
                })?;
                created += 1;
            }
            Err(e) => {
                log::error!(
                    "Error checking if provider '{}' exists: {}",
                    seed.name,
                    e
                );
                return Err(e.into());
            }
        }
    }

    log::info!("Provider seeding completed ({} created)", created);
    Ok(created)
}
