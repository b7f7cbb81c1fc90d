use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::sync::SyncFailure;

/// Failure while recomputing a record's derived fields.
///
/// Cloneable so one settled recomputation can be handed to every caller
/// that attached to it while it was in flight.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecomputeError {
    #[error("could not stat {path}: {message}")]
    Stat { path: PathBuf, message: String },

    #[error("could not list directory {path}: {message}")]
    Listing { path: PathBuf, message: String },

    #[error("could not hash {path}: {message}")]
    Hash { path: PathBuf, message: String },

    #[error("extractor `{extractor}` failed for {path}: {message}")]
    Extract {
        extractor: &'static str,
        path: PathBuf,
        message: String,
    },

    #[error("recomputation of {path} was aborted: {message}")]
    Aborted { path: PathBuf, message: String },
}

impl RecomputeError {
    pub fn path(&self) -> &PathBuf {
        match self {
            RecomputeError::Stat { path, .. }
            | RecomputeError::Listing { path, .. }
            | RecomputeError::Hash { path, .. }
            | RecomputeError::Extract { path, .. }
            | RecomputeError::Aborted { path, .. } => path,
        }
    }
}

#[derive(Error, Debug)]
pub enum CatalogError {
    /// Stat or read failure while checking whether a stored record is stale.
    #[error("could not validate record {path}")]
    Validation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Recompute(#[from] RecomputeError),

    #[error("path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("metadata store is unavailable: {0}")]
    StoreConnection(Arc<str>),

    #[error("directory sync finished with {} failed registration(s)", .0.len())]
    PartialSync(Vec<SyncFailure>),

    #[error("refusing to persist partially loaded record {0}")]
    PartialRecord(PathBuf),

    #[error("a record with this path already exists ({0})")]
    DuplicatePath(String),

    #[error("stored document is invalid: {0}")]
    InvalidDocument(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                CatalogError::DuplicatePath(
                    db.constraint().unwrap_or("current_path").to_string(),
                )
            }
            _ => CatalogError::Backend(err.to_string()),
        }
    }
}

impl From<monet_model::ModelError> for CatalogError {
    fn from(err: monet_model::ModelError) -> Self {
        CatalogError::InvalidDocument(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
