use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use monet_model::RecordId;
use serde_json::Value;
use tokio::sync::RwLock;

use super::backend::{DocumentBackend, StoredDocument, is_within};
use super::projection::Projection;
use crate::error::{CatalogError, Result};

/// Process-local document collection.
///
/// Enforces the same unique current-path constraint as the PostgreSQL
/// table so store-level conflict handling behaves identically.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: RwLock<MemoryState>,
    writes: AtomicU64,
}

#[derive(Debug, Default)]
struct MemoryState {
    documents: HashMap<RecordId, (String, Value)>,
    by_path: BTreeMap<String, RecordId>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.documents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Successful inserts plus updates since creation.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Raw stored document, bypassing hydration.
    pub async fn document(&self, path: &str) -> Option<Value> {
        let state = self.state.read().await;
        let id = state.by_path.get(path)?;
        state.documents.get(id).map(|(_, doc)| doc.clone())
    }
}

#[async_trait]
impl DocumentBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn find_one(
        &self,
        path: &str,
        projection: &Projection,
    ) -> Result<Option<StoredDocument>> {
        let state = self.state.read().await;
        let Some(id) = state.by_path.get(path) else {
            return Ok(None);
        };
        Ok(state.documents.get(id).map(|(_, doc)| {
            let mut document = doc.clone();
            projection.apply(&mut document);
            StoredDocument { id: *id, document }
        }))
    }

    async fn find_id(&self, path: &str) -> Result<Option<RecordId>> {
        Ok(self.state.read().await.by_path.get(path).copied())
    }

    async fn count(&self, path: &str, limit: u64) -> Result<u64> {
        let present = u64::from(self.state.read().await.by_path.contains_key(path));
        Ok(present.min(limit))
    }

    async fn insert_one(&self, path: &str, document: Value) -> Result<RecordId> {
        let mut state = self.state.write().await;
        if state.by_path.contains_key(path) {
            return Err(CatalogError::DuplicatePath(path.to_string()));
        }
        let id = RecordId::new();
        state.by_path.insert(path.to_string(), id);
        state.documents.insert(id, (path.to_string(), document));
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    async fn update_one(&self, id: RecordId, path: &str, document: Value) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some((old_path, _)) = state.documents.get(&id) else {
            return Ok(false);
        };
        let old_path = old_path.clone();

        if old_path != path {
            if state.by_path.get(path).is_some_and(|holder| *holder != id) {
                return Err(CatalogError::DuplicatePath(path.to_string()));
            }
            state.by_path.remove(&old_path);
            state.by_path.insert(path.to_string(), id);
        }
        state.documents.insert(id, (path.to_string(), document));
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    async fn list_paths(&self, root: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .by_path
            .range(root.to_string()..)
            .map(|(path, _)| path)
            .take_while(|path| path.starts_with(root))
            .filter(|path| is_within(root, path))
            .cloned()
            .collect())
    }

    async fn close(&self) {}
}
