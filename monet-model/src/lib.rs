//! Core data model definitions shared across Monet crates.
#![allow(missing_docs)]

pub mod content;
pub mod error;
pub mod ids;
pub mod metadata;
pub mod record;
pub mod stat;

pub use content::FileContent;
pub use error::{ModelError, Result as ModelResult};
pub use ids::RecordId;
pub use metadata::{METADATA_VERSION_KEY, Metadata};
pub use record::{FileRecord, path_key};
pub use stat::{FileKind, FileStat};
