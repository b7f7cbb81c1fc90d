//! Metadata store façade: lookups with lazy validation, persistence, and
//! directory reconciliation on cache misses.

pub mod backend;
mod gate;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod projection;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use monet_model::{FileRecord, RecordId, path_key};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

pub use backend::{DocumentBackend, StoredDocument};
pub use memory::InMemoryBackend;
#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;
pub use projection::Projection;

use crate::config::{BackendConfig, CatalogConfig};
use crate::error::{CatalogError, Result};
use crate::extract::ExtractorRegistry;
use crate::fs::{FileSystem, RealFs, absolutize};
use crate::sync::{DirectorySynchronizer, RegistrationTarget, SyncReport};
use crate::update::UpdateCoordinator;
use gate::ReadyGate;

/// Persistence façade over a [`DocumentBackend`].
///
/// Cloning is cheap; clones share the backend, the in-flight recomputation
/// registry, and pending background writes.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    gate: ReadyGate,
    coordinator: UpdateCoordinator,
    synchronizer: DirectorySynchronizer,
    config: CatalogConfig,
    background: Mutex<JoinSet<()>>,
}

/// Build the backend named by `config`.
pub async fn connect_backend(config: &BackendConfig) -> Result<Arc<dyn DocumentBackend>> {
    match config {
        BackendConfig::Memory => Ok(Arc::new(InMemoryBackend::new())),
        #[cfg(feature = "postgres")]
        BackendConfig::Postgres(pg) => Ok(Arc::new(PostgresBackend::connect(pg).await?)),
        #[cfg(not(feature = "postgres"))]
        BackendConfig::Postgres(_) => Err(CatalogError::StoreConnection(
            "built without PostgreSQL support".into(),
        )),
    }
}

impl MetadataStore {
    /// Open a store over the real filesystem with the built-in extractors.
    ///
    /// Returns as soon as the connection attempt has started; operations
    /// wait for it to finish.
    pub async fn open(config: CatalogConfig) -> Self {
        Self::open_with(
            config,
            Arc::new(RealFs::new()),
            Arc::new(ExtractorRegistry::with_defaults()),
        )
        .await
    }

    pub async fn open_with(
        config: CatalogConfig,
        fs: Arc<dyn FileSystem>,
        extractors: Arc<ExtractorRegistry>,
    ) -> Self {
        let backend_config = config.backend.clone();
        let gate = ReadyGate::pending(async move { connect_backend(&backend_config).await }).await;
        Self::assemble(gate, config, fs, extractors)
    }

    /// Open and wait for the backend, surfacing connection failures.
    pub async fn connect(config: CatalogConfig) -> Result<Self> {
        let store = Self::open(config).await;
        store.wait_ready().await?;
        Ok(store)
    }

    /// Store over an already connected backend.
    pub fn with_backend(
        backend: Arc<dyn DocumentBackend>,
        config: CatalogConfig,
        fs: Arc<dyn FileSystem>,
        extractors: Arc<ExtractorRegistry>,
    ) -> Self {
        Self::assemble(ReadyGate::ready(backend), config, fs, extractors)
    }

    fn assemble(
        gate: ReadyGate,
        config: CatalogConfig,
        fs: Arc<dyn FileSystem>,
        extractors: Arc<ExtractorRegistry>,
    ) -> Self {
        let coordinator = UpdateCoordinator::new(Arc::clone(&fs), extractors, &config);
        let synchronizer = DirectorySynchronizer::new(fs, config.sync.clone());
        Self {
            inner: Arc::new(StoreInner {
                gate,
                coordinator,
                synchronizer,
                config,
                background: Mutex::new(JoinSet::new()),
            }),
        }
    }

    /// Resolves once the backend is connected, or with the connection error.
    pub async fn wait_ready(&self) -> Result<()> {
        self.inner.gate.backend().await.map(|_| ())
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.inner.config
    }

    pub fn coordinator(&self) -> &UpdateCoordinator {
        &self.inner.coordinator
    }

    /// Whether a record currently lives at `path`, valid or not.
    pub async fn exists(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = absolutize(path.as_ref())?;
        let backend = self.inner.gate.backend().await?;
        Ok(backend.count(&path_key(&path), 1).await? > 0)
    }

    /// Valid record for `path`, syncing the containing directory on a miss.
    ///
    /// Relative paths are resolved against the working directory.
    pub async fn get(
        &self,
        path: impl AsRef<Path>,
        projection: &Projection,
    ) -> Result<Option<FileRecord>> {
        self.get_with(path, projection, true).await
    }

    /// Like [`get`](Self::get); with `allow_sync` false a miss returns
    /// `None` immediately.
    pub async fn get_with(
        &self,
        path: impl AsRef<Path>,
        projection: &Projection,
        allow_sync: bool,
    ) -> Result<Option<FileRecord>> {
        let path = absolutize(path.as_ref())?;
        if let Some(record) = self.lookup(&path, projection).await? {
            return Ok(Some(record));
        }
        if !allow_sync || !self.sync_for_miss(&path).await? {
            return Ok(None);
        }
        self.lookup(&path, projection).await
    }

    async fn lookup(&self, path: &Path, projection: &Projection) -> Result<Option<FileRecord>> {
        let backend = self.inner.gate.backend().await?;
        let key = path_key(path);
        let Some(stored) = backend.find_one(&key, projection).await? else {
            return Ok(None);
        };

        let record = decode(stored, projection)?;
        let coordinator = &self.inner.coordinator;
        let hydrated = if projection.is_full() {
            coordinator.hydrate(record).await?
        } else {
            let freshness = coordinator.assess(&record).await?;
            if freshness.is_current() {
                return Ok(Some(record));
            }
            // Refresh from the full document so excluded fields are not lost.
            let Some(stored) = backend.find_one(&key, &Projection::full()).await? else {
                return Ok(None);
            };
            let full = decode(stored, &Projection::full())?;
            coordinator.refresh(full, freshness).await?
        };

        if hydrated.refreshed {
            self.persist_in_background(hydrated.record.clone());
        }
        projection.apply_to_record(hydrated.record).map(Some)
    }

    /// Sync the directory that holds `path` after a lookup miss.
    ///
    /// Returns false when nothing exists at `path`. A failure to register
    /// `path` itself, or to list the directory holding it, is returned as
    /// the error.
    async fn sync_for_miss(&self, path: &Path) -> Result<bool> {
        let root = match self.inner.coordinator.fs().stat(path).await {
            Ok(stat) if stat.is_directory => path.to_path_buf(),
            Ok(_) => path
                .parent()
                .map_or_else(|| path.to_path_buf(), Path::to_path_buf),
            // Synced as-is so the walk rejects it with PathNotFound.
            Err(e) if e.kind() == io::ErrorKind::NotFound => path.to_path_buf(),
            Err(source) => {
                return Err(CatalogError::Validation {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let report = match self.sync(&root).await {
            Ok(report) => report,
            Err(CatalogError::PathNotFound(missing)) => {
                debug!(target: "catalog::store", path = %missing.display(), "nothing on disk to sync");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if !report.is_complete() {
            warn!(
                target: "catalog::store",
                root = %report.root.display(),
                failed = report.failures.len(),
                "sync after miss was partial"
            );
        }
        // The path's own failure wins; an unlistable root also hides it.
        let mut own = None;
        let mut root_failure = None;
        let (key, root_key) = (path_key(path), path_key(&report.root));
        for failure in report.failures {
            let failed = path_key(&failure.path);
            if failed == key {
                own = Some(failure);
            } else if failed == root_key {
                root_failure = Some(failure);
            }
        }
        match own.or(root_failure) {
            Some(failure) => Err(failure.into_error()),
            None => Ok(true),
        }
    }

    /// Insert or update `record`, returning its storage id.
    ///
    /// Existing documents are matched by current path first, then by the
    /// record's own id (a rename). Projected records are refused.
    pub async fn store(&self, record: &FileRecord) -> Result<RecordId> {
        if record.is_partial() {
            return Err(CatalogError::PartialRecord(record.path().to_path_buf()));
        }
        record.validate_identity()?;

        let backend = self.inner.gate.backend().await?;
        let key = record.path_key();
        let document = serde_json::to_value(record)?;

        if let Some(id) = backend.find_id(&key).await? {
            backend.update_one(id, &key, document).await?;
            return Ok(id);
        }
        if let Some(id) = record.id
            && backend.update_one(id, &key, document.clone()).await?
        {
            return Ok(id);
        }

        match backend.insert_one(&key, document.clone()).await {
            Ok(id) => Ok(id),
            Err(CatalogError::DuplicatePath(_)) => {
                // Lost an insert race; the winner's row is the record now.
                let id = backend
                    .find_id(&key)
                    .await?
                    .ok_or_else(|| CatalogError::DuplicatePath(key.clone()))?;
                backend.update_one(id, &key, document).await?;
                Ok(id)
            }
            Err(e) => Err(e),
        }
    }

    /// Register every unknown path under `root` (or under its parent when
    /// `root` is a file).
    pub async fn sync(&self, root: impl AsRef<Path>) -> Result<SyncReport> {
        self.inner.gate.backend().await?;
        let target = StoreRegistrar { store: self };
        self.inner
            .synchronizer
            .sync(&target, root.as_ref())
            .await
    }

    /// Stored paths under `root` that no longer exist on disk.
    ///
    /// Reports only; nothing is removed.
    pub async fn orphans(&self, root: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let root = absolutize(root.as_ref())?;
        let backend = self.inner.gate.backend().await?;
        let stored = backend.list_paths(&path_key(&root)).await?;
        let fs = Arc::clone(self.inner.coordinator.fs());
        let parallelism = self.inner.config.sync.max_parallel_registrations.max(1);

        let mut orphans: Vec<PathBuf> = futures::stream::iter(stored)
            .map(|path| {
                let fs = Arc::clone(&fs);
                async move {
                    let path = PathBuf::from(path);
                    (!fs.path_exists(&path).await).then_some(path)
                }
            })
            .buffer_unordered(parallelism)
            .filter_map(|orphan| async move { orphan })
            .collect()
            .await;
        orphans.sort();
        Ok(orphans)
    }

    /// Wait for background persistence started by refreshed lookups.
    pub async fn flush(&self) {
        let mut pending = std::mem::take(&mut *self.background());
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                error!(target: "catalog::store", error = %e, "background persistence task failed");
            }
        }
    }

    /// Flush pending writes and release the backend. Later operations fail
    /// with [`CatalogError::StoreConnection`].
    pub async fn close(&self) {
        self.flush().await;
        if let Some(backend) = self.inner.gate.close().await {
            backend.close().await;
        }
    }

    fn persist_in_background(&self, record: FileRecord) {
        let store = self.clone();
        let mut background = self.background();
        while background.try_join_next().is_some() {}
        background.spawn(async move {
            if let Err(e) = store.store(&record).await {
                error!(
                    target: "catalog::store",
                    path = %record.path().display(),
                    error = %e,
                    "failed to persist refreshed record"
                );
            }
        });
    }

    fn background(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.inner
            .background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn decode(stored: StoredDocument, projection: &Projection) -> Result<FileRecord> {
    let mut record: FileRecord = serde_json::from_value(stored.document)?;
    record.validate_identity()?;
    record.id = Some(stored.id);
    if !projection.is_full() {
        record.mark_partial();
    }
    Ok(record)
}

struct StoreRegistrar<'a> {
    store: &'a MetadataStore,
}

#[async_trait]
impl RegistrationTarget for StoreRegistrar<'_> {
    async fn is_registered(&self, path: &Path) -> Result<bool> {
        self.store.exists(path).await
    }

    async fn register(&self, path: &Path) -> Result<()> {
        let record = self.store.inner.coordinator.hydrate_unseen(path).await?;
        self.store.store(&record).await?;
        Ok(())
    }
}
