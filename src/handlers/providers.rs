//! # Providers API Handlers
//!
//! Administrative CRUD over the global provider catalog, plus the metadata
//! each provider type advertises.

use crate::connectors::ProviderMetadata;
use crate::error::ApiError;
use crate::models::provider;
use crate::repositories::ProviderPatch;
use crate::server::AppState;
use axum::{
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Query parameters for providers listing
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListProvidersQuery {
    /// Include deactivated providers (default: false)
    #[serde(default)]
    pub include_inactive: bool,
}

/// Provider information for API responses
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ProviderInfo {
    pub id: i32,
    /// Provider type wire value (e.g. "BIGQUERY")
    pub provider_type: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<provider::Model> for ProviderInfo {
    fn from(model: provider::Model) -> Self {
        Self {
            id: model.id,
            provider_type: model.provider_type,
            name: model.name,
            description: model.description,
            is_active: model.is_active,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

/// Response containing the list of providers
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderInfo>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateProviderRequest {
    /// Provider type wire value
    #[schema(example = "BIGQUERY")]
    pub provider_type: String,
    #[schema(example = "bigquery")]
    pub name: String,
    pub description: Option<String>,
}

/// Partial provider update; omitted fields are left unchanged
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateProviderRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

/// Metadata of every supported provider type
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProviderTypesResponse {
    pub provider_types: Vec<ProviderMetadata>,
}

/// Lists providers (active only unless requested)
#[utoipa::path(
    get,
    path = "/providers",
    params(ListProvidersQuery),
    responses(
        (status = 200, description = "List of providers", body = ProvidersResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "providers"
)]
pub async fn list_providers(
    State(state): State<AppState>,
    query: Result<Query<ListProvidersQuery>, QueryRejection>,
) -> Result<Json<ProvidersResponse>, ApiError> {
    let Query(query) = query?;
    let providers = state
        .registry
        .list_providers(query.include_inactive)
        .await?
        .into_iter()
        .map(ProviderInfo::from)
        .collect();
    Ok(Json(ProvidersResponse { providers }))
}

/// Creates a provider
#[utoipa::path(
    post,
    path = "/providers",
    request_body = CreateProviderRequest,
    responses(
        (status = 201, description = "Provider created", body = ProviderInfo),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "Unsupported provider type", body = ApiError)
    ),
    tag = "providers"
)]
pub async fn create_provider(
    State(state): State<AppState>,
    payload: Result<Json<CreateProviderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProviderInfo>), ApiError> {
    let Json(request) = payload?;
    let provider = state
        .registry
        .create_provider(&request.provider_type, &request.name, request.description)
        .await?;
    Ok((StatusCode::CREATED, Json(provider.into())))
}

/// Updates a provider's name, description or active flag
#[utoipa::path(
    put,
    path = "/providers/{id}",
    params(("id" = i32, Path, description = "Provider id")),
    request_body = UpdateProviderRequest,
    responses(
        (status = 200, description = "Provider updated", body = ProviderInfo),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "Provider not found", body = ApiError)
    ),
    tag = "providers"
)]
pub async fn update_provider(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    payload: Result<Json<UpdateProviderRequest>, JsonRejection>,
) -> Result<Json<ProviderInfo>, ApiError> {
    let Json(request) = payload?;
    let patch = ProviderPatch {
        name: request.name,
        description: request.description.map(Some),
        is_active: request.is_active,
    };
    let provider = state.registry.update_provider(id, patch).await?;
    Ok(Json(provider.into()))
}

/// Deactivates a provider; existing bindings are kept but no longer sync
#[utoipa::path(
    delete,
    path = "/providers/{id}",
    params(("id" = i32, Path, description = "Provider id")),
    responses(
        (status = 200, description = "Provider deactivated", body = ProviderInfo),
        (status = 404, description = "Provider not found", body = ApiError)
    ),
    tag = "providers"
)]
pub async fn delete_provider(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ProviderInfo>, ApiError> {
    let provider = state.registry.deactivate_provider(id).await?;
    Ok(Json(provider.into()))
}

/// Lists supported provider types and their credential fields
#[utoipa::path(
    get,
    path = "/provider-types",
    responses(
        (status = 200, description = "Supported provider types", body = ProviderTypesResponse)
    ),
    tag = "providers"
)]
pub async fn list_provider_types(State(state): State<AppState>) -> Json<ProviderTypesResponse> {
    Json(ProviderTypesResponse {
        provider_types: state.registry.vault().registry().list_metadata(),
    })
}
