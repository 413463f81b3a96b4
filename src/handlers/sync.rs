//! # Sync API Handlers
//!
//! Triggers connection tests and syncs for a tenant. Per-provider failures
//! come back inside the result map with a 200; only lookup and metadata
//! store errors fail the request.

use super::ensure_tenant_id;
use crate::error::ApiError;
use crate::orchestrator::{SyncResult, TenantResults};
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State, rejection::QueryRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

fn default_incremental() -> bool {
    true
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct SyncQuery {
    /// Only export rows changed since the last successful sync (default: true)
    #[serde(default = "default_incremental")]
    pub incremental: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionTestResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncResponse {
    /// Keyed by `<provider name>_<binding id>`
    pub results: TenantResults,
}

/// Checks that a binding's credentials can reach its provider
#[utoipa::path(
    post,
    path = "/tenants/{tenant_id}/providers/{provider_id}/test-connection",
    params(
        ("tenant_id" = i64, Path, description = "Tenant id"),
        ("provider_id" = i32, Path, description = "Provider id")
    ),
    responses(
        (status = 200, description = "Probe finished", body = ConnectionTestResponse),
        (status = 404, description = "Binding not found", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn test_connection(
    State(state): State<AppState>,
    Path((tenant_id, provider_id)): Path<(i64, i32)>,
) -> Result<Json<ConnectionTestResponse>, ApiError> {
    let tenant_id = ensure_tenant_id(tenant_id)?;
    let success = state
        .orchestrator
        .test_connection(tenant_id, provider_id)
        .await?;
    Ok(Json(ConnectionTestResponse { success }))
}

/// Syncs every enabled binding of a tenant
#[utoipa::path(
    post,
    path = "/tenants/{tenant_id}/sync",
    params(
        ("tenant_id" = i64, Path, description = "Tenant id"),
        SyncQuery
    ),
    responses(
        (status = 200, description = "Per-provider results", body = SyncResponse),
        (status = 400, description = "Validation error", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn sync_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<i64>,
    query: Result<Query<SyncQuery>, QueryRejection>,
) -> Result<Json<SyncResponse>, ApiError> {
    let tenant_id = ensure_tenant_id(tenant_id)?;
    let Query(query) = query?;
    let results = state
        .orchestrator
        .sync_tenant(tenant_id, query.incremental)
        .await?;
    Ok(Json(SyncResponse { results }))
}

/// Syncs a single binding
#[utoipa::path(
    post,
    path = "/tenants/{tenant_id}/providers/{provider_id}/sync",
    params(
        ("tenant_id" = i64, Path, description = "Tenant id"),
        ("provider_id" = i32, Path, description = "Provider id"),
        SyncQuery
    ),
    responses(
        (status = 200, description = "Sync result", body = SyncResult),
        (status = 404, description = "Binding not found or provider inactive", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn sync_binding(
    State(state): State<AppState>,
    Path((tenant_id, provider_id)): Path<(i64, i32)>,
    query: Result<Query<SyncQuery>, QueryRejection>,
) -> Result<Json<SyncResult>, ApiError> {
    let tenant_id = ensure_tenant_id(tenant_id)?;
    let Query(query) = query?;
    let result = state
        .orchestrator
        .sync_one(tenant_id, provider_id, query.incremental)
        .await?;
    Ok(Json(result))
}
