//! Shared harness for store integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use monet_core::config::CatalogConfig;
use monet_core::extract::{ExtractError, ExtractSource, ExtractorRegistry, MetadataExtractor};
use monet_core::fs::RealFs;
use monet_core::store::{InMemoryBackend, MetadataStore};
use monet_model::Metadata;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Semaphore;

/// Extractor for `.txt` files that counts invocations per path and can be
/// held until released.
#[derive(Debug)]
pub struct CountingExtractor {
    version: u32,
    calls: Mutex<HashMap<PathBuf, usize>>,
    gate: Option<Arc<Semaphore>>,
}

impl CountingExtractor {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            calls: Mutex::new(HashMap::new()),
            gate: None,
        }
    }

    /// Every extraction waits for a permit on `gate`.
    pub fn gated(version: u32, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(version)
        }
    }

    pub fn calls(&self, path: &Path) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().expect("calls lock").values().sum()
    }
}

#[async_trait]
impl MetadataExtractor for CountingExtractor {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &["text/plain"]
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["txt"]
    }

    async fn extract(&self, source: ExtractSource<'_>) -> Result<Metadata, ExtractError> {
        *self
            .calls
            .lock()
            .expect("calls lock")
            .entry(source.path.to_path_buf())
            .or_default() += 1;

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| ExtractError::Task(e.to_string()))?;
            permit.forget();
        }

        let bytes = source.read_all().await?;
        let mut metadata = Metadata::new();
        metadata.insert("length", json!(bytes.len()));
        metadata.insert("scaled", json!({ "thumbnail": "x".repeat(bytes.len()) }));
        Ok(metadata)
    }
}

/// Extractor for `.bad` files that always fails to decode.
#[derive(Debug)]
pub struct FailingExtractor;

#[async_trait]
impl MetadataExtractor for FailingExtractor {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn version(&self) -> u32 {
        1
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &[]
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["bad"]
    }

    async fn extract(&self, _source: ExtractSource<'_>) -> Result<Metadata, ExtractError> {
        Err(ExtractError::Decode("corrupt".into()))
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub backend: Arc<InMemoryBackend>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
            backend: Arc::new(InMemoryBackend::new()),
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(&path, contents).expect("write file");
        path
    }

    pub fn mkdir(&self, relative: &str) -> PathBuf {
        let path = self.path(relative);
        std::fs::create_dir_all(&path).expect("create dir");
        path
    }

    /// A store over the shared backend. Stores opened from the same harness
    /// see the same documents, like processes sharing a database.
    pub fn store(&self, config: CatalogConfig, extractor: Arc<CountingExtractor>) -> MetadataStore {
        let mut registry = ExtractorRegistry::empty();
        registry.register(extractor);
        self.store_with(config, registry)
    }

    pub fn store_with(&self, config: CatalogConfig, registry: ExtractorRegistry) -> MetadataStore {
        MetadataStore::with_backend(
            self.backend.clone(),
            config,
            Arc::new(RealFs::new()),
            Arc::new(registry),
        )
    }

    pub fn default_store(&self, extractor: Arc<CountingExtractor>) -> MetadataStore {
        self.store(test_config(), extractor)
    }
}

pub fn test_config() -> CatalogConfig {
    let mut config = CatalogConfig::default();
    config.sync.max_parallel_registrations = 4;
    config
}
