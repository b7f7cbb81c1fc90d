//! # Monet Core
//!
//! Record lifecycle and synchronization engine for the Monet file catalog.
//!
//! ## Overview
//!
//! Every cataloged path has a [`FileRecord`](monet_model::FileRecord)
//! carrying its stat snapshot, kind, content hash and extractor metadata.
//! Records are persisted and validated lazily on lookup:
//!
//! - **Validation**: a stored record is recomputed when its schema version is
//!   old, its content hash no longer matches the disk, or its extractor has
//!   been upgraded ([`hydrate`]).
//! - **Coalescing**: concurrent recomputations of one path share a single
//!   run ([`flight`], [`update`]).
//! - **Persistence**: [`store::MetadataStore`] looks records up, refreshes
//!   stale ones and writes them back in the background.
//! - **Reconciliation**: a lookup miss syncs the containing directory
//!   ([`sync`]); [`store::MetadataStore::orphans`] reports stored paths that
//!   vanished from disk.
//!
//! ## Feature Flags
//!
//! - `postgres`: PostgreSQL document backend (sqlx)
//! - `images`: built-in image extractor (dimensions and PNG previews)
//!
//! ## Examples
//!
//! ```no_run
//! use monet_core::{config::CatalogConfig, store::{MetadataStore, Projection}};
//!
//! async fn lookup() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MetadataStore::connect(CatalogConfig::default()).await?;
//!     let view = Projection::excluding(["metadata.scaled"]);
//!     if let Some(record) = store.get("/srv/photos/cat.jpg", &view).await? {
//!         println!("{} {:?}", record.path().display(), record.hash);
//!     }
//!     store.close().await;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod extract;
pub mod flight;
pub mod fs;
pub mod hash;
pub mod hydrate;
pub mod store;
pub mod sync;
pub mod update;

#[cfg(feature = "postgres")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use config::{CatalogConfig, DirectoryHashMode, RECORD_SCHEMA_VERSION, SyncConfig};
pub use error::{CatalogError, RecomputeError, Result};
pub use store::{MetadataStore, Projection};
pub use sync::{SyncFailure, SyncReport};
