//! Directory reconciliation: register on-disk paths the store does not know.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{CatalogError, RecomputeError, Result};
use crate::fs::{FileSystem, absolutize};

/// What the synchronizer registers paths into.
#[async_trait]
pub trait RegistrationTarget: Send + Sync {
    async fn is_registered(&self, path: &Path) -> Result<bool>;

    /// Compute and persist a record for a path not yet in the catalog.
    async fn register(&self, path: &Path) -> Result<()>;
}

/// One path that could not be listed or registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub path: PathBuf,
    pub error: String,
    /// Typed cause when registration failed while recomputing the record.
    #[serde(skip)]
    pub recompute: Option<RecomputeError>,
}

impl SyncFailure {
    fn new(path: &Path, error: impl ToString) -> Self {
        Self {
            path: path.to_path_buf(),
            error: error.to_string(),
            recompute: None,
        }
    }

    fn from_error(path: &Path, error: CatalogError) -> Self {
        let mut failure = Self::new(path, &error);
        if let CatalogError::Recompute(cause) = error {
            failure.recompute = Some(cause);
        }
        failure
    }

    /// The error a caller asking for this one path should see.
    pub fn into_error(mut self) -> CatalogError {
        match self.recompute.take() {
            Some(cause) => CatalogError::Recompute(cause),
            None => CatalogError::PartialSync(vec![self]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Directory that was walked, after substituting a file's parent.
    pub root: PathBuf,
    /// Root plus every descendant found.
    pub discovered: usize,
    pub registered: usize,
    pub already_present: usize,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn collected failures into [`CatalogError::PartialSync`].
    pub fn into_result(self) -> Result<SyncReport> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(CatalogError::PartialSync(self.failures))
        }
    }
}

enum Registration {
    Registered,
    Present,
    Failed(SyncFailure),
}

/// Walks a directory tree and registers unknown paths with bounded
/// parallelism.
///
/// Safe to run repeatedly or concurrently over overlapping trees: paths
/// already present are skipped, and a registration that loses a race to
/// another sync resolves to an update of the winning record.
#[derive(Debug, Clone)]
pub struct DirectorySynchronizer {
    fs: Arc<dyn FileSystem>,
    config: SyncConfig,
}

impl DirectorySynchronizer {
    pub fn new(fs: Arc<dyn FileSystem>, config: SyncConfig) -> Self {
        Self { fs, config }
    }

    /// The directory a sync of `root` actually walks.
    ///
    /// Relative roots are anchored at the working directory so every path
    /// the walk yields is absolute.
    pub async fn resolve_root(&self, root: &Path) -> Result<PathBuf> {
        let root = absolutize(root)?;
        if !self.fs.path_exists(&root).await {
            return Err(CatalogError::PathNotFound(root));
        }
        let stat = self.fs.stat(&root).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CatalogError::PathNotFound(root.clone()),
            _ => CatalogError::Io(e),
        })?;
        if stat.is_directory {
            return Ok(root);
        }
        match root.parent() {
            Some(parent) => Ok(parent.to_path_buf()),
            None => Ok(root),
        }
    }

    /// Root followed by every descendant, without following symlinked
    /// directories. Unlistable directories are reported and skipped.
    async fn walk(&self, root: &Path, failures: &mut Vec<SyncFailure>) -> Vec<PathBuf> {
        let mut found = vec![root.to_path_buf()];
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let entries = match self.fs.read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(target: "catalog::sync", path = %dir.display(), error = %e, "could not list directory");
                    failures.push(SyncFailure::new(&dir, format!("could not list directory: {e}")));
                    continue;
                }
            };
            for entry in entries {
                if !self.config.include_hidden && entry.name.starts_with('.') {
                    continue;
                }
                let child = dir.join(&entry.name);
                if entry.lossy_name {
                    warn!(target: "catalog::sync", path = %child.display(), "skipping non-UTF-8 file name");
                    failures.push(SyncFailure::new(&child, "file name is not valid UTF-8"));
                    continue;
                }
                if entry.is_dir {
                    pending.push(child.clone());
                }
                found.push(child);
            }
        }
        found
    }

    pub async fn sync(&self, target: &dyn RegistrationTarget, root: &Path) -> Result<SyncReport> {
        let started = Instant::now();
        let root = self.resolve_root(root).await?;
        info!(target: "catalog::sync", root = %root.display(), "sync started");

        let mut report = SyncReport {
            root: root.clone(),
            ..SyncReport::default()
        };
        let paths = self.walk(&root, &mut report.failures).await;
        report.discovered = paths.len();

        let parallelism = self.config.max_parallel_registrations.max(1);
        let outcomes: Vec<Registration> = futures::stream::iter(paths)
            .map(|path| async move { register_if_missing(target, &path).await })
            .buffer_unordered(parallelism)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Registration::Registered => report.registered += 1,
                Registration::Present => report.already_present += 1,
                Registration::Failed(failure) => report.failures.push(failure),
            }
        }

        info!(
            target: "catalog::sync",
            root = %root.display(),
            discovered = report.discovered,
            registered = report.registered,
            failed = report.failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sync finished"
        );
        Ok(report)
    }
}

async fn register_if_missing(target: &dyn RegistrationTarget, path: &Path) -> Registration {
    match target.is_registered(path).await {
        Ok(true) => return Registration::Present,
        Ok(false) => {}
        Err(e) => return Registration::Failed(SyncFailure::from_error(path, e)),
    }
    match target.register(path).await {
        Ok(()) => {
            debug!(target: "catalog::sync", path = %path.display(), "registered");
            Registration::Registered
        }
        Err(e) => {
            warn!(target: "catalog::sync", path = %path.display(), error = %e, "registration failed");
            Registration::Failed(SyncFailure::from_error(path, e))
        }
    }
}
