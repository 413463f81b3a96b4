//! # Server Configuration
//!
//! Service wiring, the management API router and its OpenAPI document.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{AppConfig, SyncConfig};
use crate::connection_tester::ConnectionTester;
use crate::connectors::Registry;
use crate::crypto::CryptoKey;
use crate::extractor::{Extractor, RecordSource, SqlRecordSource};
use crate::handlers;
use crate::loader::Loader;
use crate::orchestrator::SyncOrchestrator;
use crate::provider_registry::ProviderRegistry;
use crate::telemetry;
use crate::vault::{ConfigVault, derive_or_load_key};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub registry: ProviderRegistry,
    pub orchestrator: SyncOrchestrator,
}

impl AppState {
    /// Wires the production services from configuration.
    ///
    /// Loads the encryption key under the profile's key policy; a missing
    /// key outside `local`/`test` is an error, as is a connector that cannot
    /// be constructed.
    pub fn build(
        config: &AppConfig,
        db: DatabaseConnection,
        source_db: DatabaseConnection,
    ) -> anyhow::Result<Self> {
        let key = derive_or_load_key(config.crypto_key.as_deref(), config.key_policy())
            .context("loading encryption key")?;
        let connectors = Registry::from_config(config).context("building connectors")?;
        Ok(Self::assemble(
            db,
            connectors,
            key,
            Arc::new(SqlRecordSource::new(source_db)),
            &config.sync,
        ))
    }

    /// Wires services from explicit parts.
    pub fn assemble(
        db: DatabaseConnection,
        connectors: Registry,
        key: CryptoKey,
        source: Arc<dyn RecordSource>,
        sync: &SyncConfig,
    ) -> Self {
        let db = Arc::new(db);
        let connectors = Arc::new(connectors);
        let vault = ConfigVault::new(key, connectors.clone());
        let registry = ProviderRegistry::new(db.clone(), vault);

        let orchestrator = SyncOrchestrator::new(
            registry.clone(),
            Extractor::new(source),
            Loader::new(connectors, sync.load_timeout()),
            ConnectionTester::new(registry.clone(), sync.connect_timeout()),
        )
        .with_tenant_concurrency(sync.tenant_concurrency);

        Self {
            db,
            registry,
            orchestrator,
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route(
            "/providers",
            get(handlers::providers::list_providers).post(handlers::providers::create_provider),
        )
        .route(
            "/providers/{id}",
            put(handlers::providers::update_provider).delete(handlers::providers::delete_provider),
        )
        .route(
            "/provider-types",
            get(handlers::providers::list_provider_types),
        )
        .route(
            "/tenants/{tenant_id}/providers",
            get(handlers::bindings::list_bindings).post(handlers::bindings::create_binding),
        )
        .route(
            "/tenants/{tenant_id}/providers/status",
            get(handlers::bindings::binding_status),
        )
        .route(
            "/tenants/{tenant_id}/providers/{provider_id}",
            put(handlers::bindings::update_binding).delete(handlers::bindings::delete_binding),
        )
        .route(
            "/tenants/{tenant_id}/providers/{provider_id}/test-connection",
            post(handlers::sync::test_connection),
        )
        .route(
            "/tenants/{tenant_id}/providers/{provider_id}/sync",
            post(handlers::sync::sync_binding),
        )
        .route("/tenants/{tenant_id}/sync", post(handlers::sync::sync_tenant))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(telemetry::trace_context_middleware)),
        )
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig, state: AppState) -> anyhow::Result<()> {
    let app = create_app(state);

    // Resolve the configured bind address
    let addr = config
        .bind_addr()
        .with_context(|| format!("Invalid server address: {}", config.api_bind_addr))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::providers::list_providers,
        crate::handlers::providers::create_provider,
        crate::handlers::providers::update_provider,
        crate::handlers::providers::delete_provider,
        crate::handlers::providers::list_provider_types,
        crate::handlers::bindings::list_bindings,
        crate::handlers::bindings::create_binding,
        crate::handlers::bindings::update_binding,
        crate::handlers::bindings::delete_binding,
        crate::handlers::bindings::binding_status,
        crate::handlers::sync::test_connection,
        crate::handlers::sync::sync_tenant,
        crate::handlers::sync::sync_binding,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::error::ApiError,
            crate::error::ProviderError,
            crate::connectors::ProviderType,
            crate::connectors::ProviderMetadata,
            crate::handlers::providers::ProviderInfo,
            crate::handlers::providers::ProvidersResponse,
            crate::handlers::providers::CreateProviderRequest,
            crate::handlers::providers::UpdateProviderRequest,
            crate::handlers::providers::ProviderTypesResponse,
            crate::handlers::bindings::CreateBindingRequest,
            crate::handlers::bindings::UpdateBindingRequest,
            crate::handlers::bindings::BindingsResponse,
            crate::provider_registry::BindingView,
            crate::provider_registry::BindingStatus,
            crate::provider_registry::SyncStatus,
            crate::handlers::sync::ConnectionTestResponse,
            crate::handlers::sync::SyncResponse,
            crate::orchestrator::SyncResult,
        )
    ),
    tags(
        (name = "root", description = "Service info and health"),
        (name = "providers", description = "Provider catalog"),
        (name = "bindings", description = "Tenant provider bindings"),
        (name = "sync", description = "Connection tests and warehouse sync")
    ),
    info(
        title = "Datasync API",
        description = "Tenant provider bindings and warehouse export",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
