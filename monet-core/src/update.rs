use std::path::Path;
use std::sync::Arc;

use monet_model::{FileContent, FileKind, FileRecord, FileStat};
use tracing::{debug, warn};

use crate::config::CatalogConfig;
use crate::error::RecomputeError;
use crate::extract::{ExtractSource, ExtractorRegistry, mime_for_extension};
use crate::flight::{FlightAborted, SingleFlight};
use crate::fs::FileSystem;
use crate::hash::{Hasher, placeholder_hash};

pub type RecomputeResult = Result<FileRecord, RecomputeError>;

/// Recomputes derived record fields, at most once at a time per path.
///
/// Concurrent callers for the same path share one recomputation. The
/// derived fields come from that shared run; each caller keeps its own
/// record identity (storage id and rename history).
#[derive(Debug)]
pub struct UpdateCoordinator {
    recomputer: Arc<Recomputer>,
    flights: SingleFlight<String, RecomputeResult>,
}

#[derive(Debug)]
struct Recomputer {
    fs: Arc<dyn FileSystem>,
    hasher: Hasher,
    extractors: Arc<ExtractorRegistry>,
    schema_version: u32,
}

impl UpdateCoordinator {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        extractors: Arc<ExtractorRegistry>,
        config: &CatalogConfig,
    ) -> Self {
        let hasher = Hasher::new(Arc::clone(&fs), config.directory_hash);
        Self {
            recomputer: Arc::new(Recomputer {
                fs,
                hasher,
                extractors,
                schema_version: config.schema_version,
            }),
            flights: SingleFlight::new(),
        }
    }

    pub fn schema_version(&self) -> u32 {
        self.recomputer.schema_version
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.recomputer.fs
    }

    pub fn hasher(&self) -> &Hasher {
        &self.recomputer.hasher
    }

    pub fn extractors(&self) -> &ExtractorRegistry {
        &self.recomputer.extractors
    }

    /// Recompute `record` from what is on disk now.
    ///
    /// The input is never mutated; on failure the caller still holds the
    /// last known record.
    pub async fn recompute(&self, record: &FileRecord) -> RecomputeResult {
        let key = record.path_key();
        let recomputer = Arc::clone(&self.recomputer);
        let seed = record.clone();

        let settled = self
            .flights
            .run(key, move || async move { recomputer.run(seed).await })
            .await
            .unwrap_or_else(|FlightAborted| {
                Err(RecomputeError::Aborted {
                    path: record.path().to_path_buf(),
                    message: "recomputation task did not finish".into(),
                })
            });

        settled.map(|mut fresh| {
            fresh.id = record.id.or(fresh.id);
            fresh.history = record.history.clone();
            fresh
        })
    }

    /// Build and compute a record for a path the catalog has never seen.
    pub async fn recompute_path(&self, path: &Path) -> RecomputeResult {
        self.recompute(&FileRecord::new(path)).await
    }

    pub fn is_recomputing(&self, path: &Path) -> bool {
        self.flights.is_in_flight(&monet_model::path_key(path))
    }

    /// Number of recomputations physically started.
    pub fn recompute_count(&self) -> u64 {
        self.flights.leaders()
    }

    /// Number of requests that joined a running recomputation.
    pub fn coalesced_count(&self) -> u64 {
        self.flights.waiters()
    }
}

impl Recomputer {
    async fn run(&self, mut record: FileRecord) -> RecomputeResult {
        let path = record.path().to_path_buf();
        debug!(target: "catalog::update", path = %path.display(), "recomputing record");

        let stat = self
            .fs
            .stat(&path)
            .await
            .map_err(|e| RecomputeError::Stat {
                path: path.clone(),
                message: e.to_string(),
            })?;
        let kind = stat.kind();

        record.kind = Some(kind);
        record.mime = match kind {
            FileKind::File => record
                .extension()
                .as_deref()
                .and_then(mime_for_extension)
                .map(str::to_string),
            FileKind::Directory | FileKind::Other => None,
        };

        match kind {
            FileKind::Directory => self.refresh_directory(&mut record, &path).await?,
            FileKind::File => self.refresh_file(&mut record, &path, &stat).await?,
            FileKind::Other => {
                record.content = None;
                record.hash = Some(placeholder_hash());
            }
        }

        record.stat = Some(stat);
        if record.version < self.schema_version {
            record.version = self.schema_version;
        }
        Ok(record)
    }

    /// The listing is read once so content and hash describe the same
    /// snapshot.
    async fn refresh_directory(
        &self,
        record: &mut FileRecord,
        path: &Path,
    ) -> Result<(), RecomputeError> {
        let names: Vec<String> = self
            .fs
            .read_dir(path)
            .await
            .map_err(|e| RecomputeError::Listing {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
            .into_iter()
            .map(|entry| entry.name)
            .collect();

        record.hash = Some(self.hasher.hash_listing(&names));
        record.content = Some(FileContent::List { list: names });
        Ok(())
    }

    async fn refresh_file(
        &self,
        record: &mut FileRecord,
        path: &Path,
        stat: &FileStat,
    ) -> Result<(), RecomputeError> {
        let extractor = self.extractors.resolve_for(record);

        let special = async {
            match &extractor {
                Some(extractor) => {
                    let source = ExtractSource {
                        path,
                        stat,
                        fs: self.fs.as_ref(),
                    };
                    self.extractors
                        .run(extractor.as_ref(), source)
                        .await
                        .map(Some)
                }
                None => Ok(None),
            }
        };
        let hash = async {
            self.hasher
                .hash_file(path)
                .await
                .map_err(|e| RecomputeError::Hash {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
        };

        let (extracted, hash) = tokio::try_join!(special, hash).inspect_err(|e| {
            warn!(target: "catalog::update", path = %path.display(), error = %e, "recomputation failed");
        })?;

        record.content = Some(FileContent::LocalFile {
            address: path.to_path_buf(),
        });
        if let Some(metadata) = extracted {
            record.metadata.merge(metadata);
        }
        record.hash = Some(hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use crate::config::DirectoryHashMode;
    use crate::fs::InMemoryFs;
    use crate::hash::{hash_bytes, is_placeholder, raw_listing_hash, sorted_listing_hash};

    fn coordinator(fs: Arc<InMemoryFs>, config: &CatalogConfig) -> UpdateCoordinator {
        UpdateCoordinator::new(fs, Arc::new(ExtractorRegistry::empty()), config)
    }

    #[tokio::test]
    async fn file_records_carry_hash_content_and_mime() {
        let fs = Arc::new(InMemoryFs::new());
        fs.add_file("/docs/readme.txt", "hello");
        let coordinator = coordinator(fs, &CatalogConfig::default());

        let record = coordinator
            .recompute_path(Path::new("/docs/readme.txt"))
            .await
            .expect("recompute");

        assert_eq!(record.kind, Some(FileKind::File));
        assert_eq!(record.hash.as_deref(), Some(hash_bytes(b"hello").as_str()));
        assert_eq!(record.mime.as_deref(), Some("text/plain"));
        assert_eq!(
            record.content,
            Some(FileContent::LocalFile {
                address: PathBuf::from("/docs/readme.txt")
            })
        );
        assert_eq!(record.version, coordinator.schema_version());
        assert_eq!(record.stat.as_ref().map(|s| s.size), Some(5));
    }

    #[tokio::test]
    async fn directory_records_list_children_in_observed_order() {
        let fs = Arc::new(InMemoryFs::new());
        fs.add_file("/a/y.txt", "y");
        fs.add_file("/a/x.txt", "x");
        let raw = coordinator(Arc::clone(&fs), &CatalogConfig::default());
        let sorted = coordinator(
            fs,
            &CatalogConfig {
                directory_hash: DirectoryHashMode::Sorted,
                ..CatalogConfig::default()
            },
        );

        let record = raw.recompute_path(Path::new("/a")).await.expect("recompute");
        assert_eq!(
            record.content,
            Some(FileContent::List {
                list: vec!["y.txt".into(), "x.txt".into()]
            })
        );
        assert_eq!(record.hash, Some(raw_listing_hash(&["y.txt", "x.txt"])));

        let record = sorted.recompute_path(Path::new("/a")).await.expect("recompute");
        assert_eq!(record.hash, Some(sorted_listing_hash(&["x.txt", "y.txt"])));
    }

    #[tokio::test]
    async fn other_entries_get_placeholder_hash_and_no_content() {
        let fs = Arc::new(InMemoryFs::new());
        fs.add_other("/run/app.sock");
        let coordinator = coordinator(fs, &CatalogConfig::default());

        let record = coordinator
            .recompute_path(Path::new("/run/app.sock"))
            .await
            .expect("recompute");
        assert_eq!(record.kind, Some(FileKind::Other));
        assert!(record.content.is_none());
        assert!(record.hash.as_deref().is_some_and(is_placeholder));
    }

    #[tokio::test]
    async fn missing_path_fails_without_touching_input() {
        let fs = Arc::new(InMemoryFs::new());
        let coordinator = coordinator(fs, &CatalogConfig::default());
        let mut stored = FileRecord::new("/gone.txt");
        stored.version = 1;
        stored.hash = Some("old".into());

        let err = coordinator.recompute(&stored).await.expect_err("stat fails");
        assert!(matches!(err, RecomputeError::Stat { .. }));
        assert_eq!(stored.version, 1);
        assert_eq!(stored.hash.as_deref(), Some("old"));
        assert!(!coordinator.is_recomputing(Path::new("/gone.txt")));
    }

    #[tokio::test]
    async fn version_never_decreases() {
        let fs = Arc::new(InMemoryFs::new());
        fs.add_file("/f.bin", "x");
        let coordinator = coordinator(fs, &CatalogConfig::default());

        let mut stored = FileRecord::new("/f.bin");
        stored.version = coordinator.schema_version() + 5;
        let record = coordinator.recompute(&stored).await.expect("recompute");
        assert_eq!(record.version, coordinator.schema_version() + 5);
    }

    #[tokio::test]
    async fn caller_identity_is_preserved() {
        let fs = Arc::new(InMemoryFs::new());
        fs.add_file("/new.txt", "n");
        let coordinator = coordinator(fs, &CatalogConfig::default());

        let id = monet_model::RecordId::new();
        let mut stored = FileRecord::new("/old.txt").with_id(id);
        stored.renamed_to("/new.txt");

        let record = coordinator.recompute(&stored).await.expect("recompute");
        assert_eq!(record.id, Some(id));
        assert_eq!(record.history, stored.history);
    }
}
