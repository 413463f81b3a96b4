//! Database seeding functionality
//!
//! Populates the provider catalog with one provider per supported type when
//! the service starts.

pub mod provider;

pub use provider::seed_providers;
