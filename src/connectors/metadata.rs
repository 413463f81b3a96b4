//! Provider type tags and the metadata each connector advertises.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Target system a provider row points at.
///
/// Stored in `providers.provider_type` as the wire value (`BIGQUERY`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum ProviderType {
    #[serde(rename = "BIGQUERY")]
    BigQuery,
}

impl ProviderType {
    pub const ALL: &'static [ProviderType] = &[ProviderType::BigQuery];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::BigQuery => "BIGQUERY",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a stored or submitted provider type has no variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider type '{0}'")]
pub struct UnknownProviderType(pub String);

impl FromStr for ProviderType {
    type Err = UnknownProviderType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BIGQUERY" => Ok(ProviderType::BigQuery),
            _ => Err(UnknownProviderType(s.to_string())),
        }
    }
}

/// Credential shape a connector accepts
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderMetadata {
    pub provider_type: ProviderType,
    /// Human-readable name
    pub display_name: String,
    /// Config keys that must be present and non-empty
    pub required_fields: Vec<String>,
    /// Config keys that may be omitted (defaults apply)
    pub optional_fields: Vec<String>,
    /// Key rewritten with the tenant suffix, if the provider has a namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_field: Option<String>,
}
