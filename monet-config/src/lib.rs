//! Configuration loading for the Monet catalog.
//!
//! The typed settings live in [`monet_core::config`]; this crate resolves them
//! from config files, inline JSON, `.env` files and environment overrides.

#![allow(missing_docs)]

pub mod loader;
pub mod util;

pub use loader::{ConfigLoad, ConfigLoader, ConfigSource, error::ConfigLoadError};
pub use monet_core::config::{BackendConfig, CatalogConfig, PostgresConfig, SyncConfig};
