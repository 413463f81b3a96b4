//! # Data Models
//!
//! SeaORM entities for the metadata store plus the service info payload.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod provider;
pub mod tenant_provider_binding;

pub use provider::Entity as Provider;
pub use tenant_provider_binding::Entity as TenantProviderBinding;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "datasync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
