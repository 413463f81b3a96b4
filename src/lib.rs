//! # Datasync Library
//!
//! Multi-tenant provider bindings and warehouse export: encrypted
//! per-tenant credentials, extraction of tenant-scoped records, loads into
//! tenant-isolated warehouse namespaces, and the management API over them.

pub mod config;
pub mod connection_tester;
pub mod connectors;
pub mod crypto;
pub mod db;
pub mod error;
pub mod extractor;
pub mod handlers;
pub mod loader;
pub mod models;
pub mod orchestrator;
pub mod provider_registry;
pub mod repositories;
pub mod seeds;
pub mod server;
pub mod telemetry;
pub mod vault;
pub use migration;
