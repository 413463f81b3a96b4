//! # Tenant Binding API Handlers
//!
//! Tenant-scoped management of provider bindings. Configs are accepted as
//! plaintext JSON and are never returned.

use super::ensure_tenant_id;
use crate::error::ApiError;
use crate::provider_registry::{BindingPatch, BindingStatus, BindingView};
use crate::server::AppState;
use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateBindingRequest {
    pub provider_id: i32,
    /// Provider credentials; validated against the provider type's schema
    #[schema(value_type = Option<Object>)]
    pub config: Option<Value>,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

/// Partial binding update; omitted fields are left unchanged
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateBindingRequest {
    #[schema(value_type = Option<Object>)]
    pub config: Option<Value>,
    pub is_enabled: Option<bool>,
    pub last_sync_watermark: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BindingsResponse {
    pub bindings: Vec<BindingView>,
}

/// Lists a tenant's provider bindings
#[utoipa::path(
    get,
    path = "/tenants/{tenant_id}/providers",
    params(("tenant_id" = i64, Path, description = "Tenant id")),
    responses(
        (status = 200, description = "Tenant bindings", body = BindingsResponse),
        (status = 400, description = "Validation error", body = ApiError)
    ),
    tag = "bindings"
)]
pub async fn list_bindings(
    State(state): State<AppState>,
    Path(tenant_id): Path<i64>,
) -> Result<Json<BindingsResponse>, ApiError> {
    let tenant_id = ensure_tenant_id(tenant_id)?;
    let bindings = state.registry.list_bindings_for_tenant(tenant_id).await?;
    Ok(Json(BindingsResponse { bindings }))
}

/// Binds a tenant to a provider
#[utoipa::path(
    post,
    path = "/tenants/{tenant_id}/providers",
    params(("tenant_id" = i64, Path, description = "Tenant id")),
    request_body = CreateBindingRequest,
    responses(
        (status = 201, description = "Binding created", body = BindingView),
        (status = 400, description = "Config rejected by provider schema", body = ApiError),
        (status = 404, description = "Unknown or inactive provider", body = ApiError),
        (status = 409, description = "Binding already exists", body = ApiError)
    ),
    tag = "bindings"
)]
pub async fn create_binding(
    State(state): State<AppState>,
    Path(tenant_id): Path<i64>,
    payload: Result<Json<CreateBindingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BindingView>), ApiError> {
    let tenant_id = ensure_tenant_id(tenant_id)?;
    let Json(request) = payload?;
    let binding = state
        .registry
        .create_binding(
            tenant_id,
            request.provider_id,
            request.config.as_ref(),
            request.is_enabled,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(binding)))
}

/// Updates a binding's config, enabled flag or watermark
#[utoipa::path(
    put,
    path = "/tenants/{tenant_id}/providers/{provider_id}",
    params(
        ("tenant_id" = i64, Path, description = "Tenant id"),
        ("provider_id" = i32, Path, description = "Provider id")
    ),
    request_body = UpdateBindingRequest,
    responses(
        (status = 200, description = "Binding updated", body = BindingView),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "Binding not found", body = ApiError)
    ),
    tag = "bindings"
)]
pub async fn update_binding(
    State(state): State<AppState>,
    Path((tenant_id, provider_id)): Path<(i64, i32)>,
    payload: Result<Json<UpdateBindingRequest>, JsonRejection>,
) -> Result<Json<BindingView>, ApiError> {
    let tenant_id = ensure_tenant_id(tenant_id)?;
    let Json(request) = payload?;
    let patch = BindingPatch {
        config: request.config,
        is_enabled: request.is_enabled,
        last_sync_watermark: request.last_sync_watermark,
    };
    let binding = state
        .registry
        .update_binding(tenant_id, provider_id, patch)
        .await?;
    Ok(Json(binding))
}

/// Removes a binding
#[utoipa::path(
    delete,
    path = "/tenants/{tenant_id}/providers/{provider_id}",
    params(
        ("tenant_id" = i64, Path, description = "Tenant id"),
        ("provider_id" = i32, Path, description = "Provider id")
    ),
    responses(
        (status = 204, description = "Binding deleted"),
        (status = 404, description = "Binding not found", body = ApiError)
    ),
    tag = "bindings"
)]
pub async fn delete_binding(
    State(state): State<AppState>,
    Path((tenant_id, provider_id)): Path<(i64, i32)>,
) -> Result<StatusCode, ApiError> {
    let tenant_id = ensure_tenant_id(tenant_id)?;
    state.registry.delete_binding(tenant_id, provider_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Sync status of each of a tenant's bindings
#[utoipa::path(
    get,
    path = "/tenants/{tenant_id}/providers/status",
    params(("tenant_id" = i64, Path, description = "Tenant id")),
    responses(
        (status = 200, description = "Per-binding sync status", body = [BindingStatus]),
        (status = 400, description = "Validation error", body = ApiError)
    ),
    tag = "bindings"
)]
pub async fn binding_status(
    State(state): State<AppState>,
    Path(tenant_id): Path<i64>,
) -> Result<Json<Vec<BindingStatus>>, ApiError> {
    let tenant_id = ensure_tenant_id(tenant_id)?;
    Ok(Json(state.registry.binding_statuses(tenant_id).await?))
}
