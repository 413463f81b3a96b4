//! # Datasync API Main Entry Point
//!
//! Loads configuration, prepares the metadata store and serves the
//! management API.

use anyhow::Context;
use datasync::{config::ConfigLoader, db, seeds, server, telemetry};
use migration::{Migrator, MigratorTrait};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from layered env files and variables
    let config_loader = ConfigLoader::new();
    let config = config_loader.load().context("loading configuration")?;

    telemetry::init_tracing(&config, None).context("initializing telemetry")?;
    if let Ok(redacted_json) = config.redacted_json() {
        info!(config = %redacted_json, profile = %config.profile, "Loaded configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("connecting to metadata store")?;
    Migrator::up(&db, None)
        .await
        .context("applying migrations")?;
    seeds::seed_providers(&db)
        .await
        .context("seeding providers")?;

    let source_db = db::init_source_pool(&config)
        .await
        .context("connecting to source store")?;

    let state = server::AppState::build(&config, db, source_db).context("wiring services")?;
    server::run_server(config, state).await
}
