//! Connectors module
//!
//! One [`Connector`] per provider type, looked up through the [`Registry`]:
//! - `trait_`: the strategy interface and its error type
//! - `metadata`: provider type tags and descriptive metadata
//! - `registry`: explicit, injected lookup table
//! - `bigquery`: the warehouse strategy

pub mod bigquery;
pub mod metadata;
pub mod registry;
pub mod trait_;

pub use bigquery::BigQueryConnector;
pub use metadata::{ProviderMetadata, ProviderType, UnknownProviderType};
pub use registry::{Registry, RegistryError};
pub use trait_::{Connector, ConnectorError, LoadOutcome};
