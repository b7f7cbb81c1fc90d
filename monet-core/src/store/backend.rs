use std::fmt;

use async_trait::async_trait;
use monet_model::RecordId;
use serde_json::Value;

use super::projection::Projection;
use crate::error::Result;

/// A stored document and its storage identity.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: RecordId,
    pub document: Value,
}

/// Document collection keyed by a stable id and uniquely indexed by the
/// record's current path.
///
/// Paths handed to a backend are already normalized with
/// [`monet_model::path_key`].
#[async_trait]
pub trait DocumentBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    async fn find_one(
        &self,
        path: &str,
        projection: &Projection,
    ) -> Result<Option<StoredDocument>>;

    async fn find_id(&self, path: &str) -> Result<Option<RecordId>>;

    /// Number of documents at `path`, stopping at `limit`.
    async fn count(&self, path: &str, limit: u64) -> Result<u64>;

    /// Insert a new document. Fails with
    /// [`CatalogError::DuplicatePath`](crate::error::CatalogError::DuplicatePath)
    /// if another document already holds `path`.
    async fn insert_one(&self, path: &str, document: Value) -> Result<RecordId>;

    /// Replace the document stored under `id`, moving it to `path`.
    /// Returns false when no document has that id.
    async fn update_one(&self, id: RecordId, path: &str, document: Value) -> Result<bool>;

    /// Current paths equal to `root` or below it, sorted.
    async fn list_paths(&self, root: &str) -> Result<Vec<String>>;

    async fn close(&self);
}

/// Whether `path` is `root` or a descendant of it.
pub fn is_within(root: &str, path: &str) -> bool {
    if root == "/" {
        return path.starts_with('/');
    }
    path == root
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}
