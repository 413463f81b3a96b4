//! Batch warehouse export
//!
//! Exports one tenant, every tenant, or runs a connection test sweep. Exits
//! non-zero only when the run itself cannot proceed; individual target
//! failures are reported and counted.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use datasync::{
    config::ConfigLoader,
    connection_tester::ConnectionTestResult,
    db,
    orchestrator::{SyncResult, TenantResults},
    server::AppState,
    telemetry,
};
use migration::{Migrator, MigratorTrait};

#[derive(Parser, Debug)]
#[command(name = "export_warehouse")]
#[command(version, about = "Export tenant data to configured warehouses", long_about = None)]
#[command(group(ArgGroup::new("target").required(true).args(["tenant_id", "all_tenants", "test_connections"])))]
#[command(group(ArgGroup::new("mode").args(["incremental", "full_sync"])))]
struct Args {
    /// Export a single tenant
    #[arg(long)]
    tenant_id: Option<i64>,

    /// Export every tenant with an enabled binding
    #[arg(long)]
    all_tenants: bool,

    /// Test every enabled binding's connection instead of exporting
    #[arg(long)]
    test_connections: bool,

    /// Only export rows changed since the last successful sync (default)
    #[arg(long)]
    incremental: bool,

    /// Export everything and replace warehouse tables
    #[arg(long)]
    full_sync: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_tracing(&config, args.verbose.then_some("debug"))
        .context("initializing telemetry")?;

    let db = db::init_pool(&config)
        .await
        .context("connecting to metadata store")?;
    Migrator::up(&db, None)
        .await
        .context("applying migrations")?;
    let source_db = db::init_source_pool(&config)
        .await
        .context("connecting to source store")?;

    let state = AppState::build(&config, db, source_db).context("wiring services")?;
    let orchestrator = state.orchestrator;
    let incremental = !args.full_sync;

    if args.test_connections {
        let results = orchestrator
            .test_all_connections()
            .await
            .context("running connection tests")?;
        for result in &results {
            println!("{}", describe_connection(result));
        }
        let passed = results.iter().filter(|r| r.success).count();
        println!("Connection test summary: {}/{} successful", passed, results.len());
        return Ok(());
    }

    if let Some(tenant_id) = args.tenant_id {
        let results = orchestrator
            .sync_tenant(tenant_id, incremental)
            .await
            .with_context(|| format!("syncing tenant {}", tenant_id))?;
        if results.is_empty() {
            println!("No enabled providers for tenant {}", tenant_id);
        }
        report_tenant(&results);
        return Ok(());
    }

    let all = orchestrator
        .sync_all(incremental)
        .await
        .context("syncing all tenants")?;
    for results in all.values() {
        report_tenant(results);
    }
    let succeeded = all.values().filter(|r| tenant_succeeded(r)).count();
    println!(
        "Export summary: {}/{} tenants exported successfully",
        succeeded,
        all.len()
    );
    Ok(())
}

fn report_tenant(results: &TenantResults) {
    for (key, result) in results {
        println!("{}", describe(key, result));
    }
}

fn describe(key: &str, result: &SyncResult) -> String {
    if result.success {
        format!(
            "✓ Export successful for {}: {} records exported, {} tables created, {} tables updated",
            key,
            result.records_exported,
            result.tables_created.len(),
            result.tables_updated.len()
        )
    } else {
        format!(
            "✗ Export failed for {}: {}",
            key,
            result.error_message.as_deref().unwrap_or("unknown error")
        )
    }
}

fn describe_connection(result: &ConnectionTestResult) -> String {
    if result.success {
        format!(
            "✓ Connection test for tenant {} provider {}",
            result.tenant_id, result.provider_key
        )
    } else {
        format!(
            "✗ Connection test for tenant {} provider {}: {}",
            result.tenant_id,
            result.provider_key,
            result.error.as_deref().unwrap_or("unknown error")
        )
    }
}

fn tenant_succeeded(results: &TenantResults) -> bool {
    results.values().all(|r| r.success)
}
