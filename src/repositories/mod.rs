//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! metadata store, with tenant-scoped binding access.

pub mod binding;
pub mod provider;

pub use binding::{BindingRepository, BindingUpdate};
pub use provider::{ProviderPatch, ProviderRepository};
