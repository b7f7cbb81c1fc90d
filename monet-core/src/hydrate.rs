//! Staleness checks for records loaded from the store.

use monet_model::{FileKind, FileRecord};
use tracing::debug;

use crate::error::{CatalogError, Result};
use crate::hash::is_placeholder;
use crate::update::UpdateCoordinator;

/// Why a record does or does not need recomputation, in check order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Current,
    /// Written under an older record schema.
    SchemaOutdated { stored: u32, current: u32 },
    /// Bytes or listing on disk no longer match the stored hash.
    ContentChanged,
    /// The responsible extractor is newer than the stored metadata.
    ExtractorOutdated {
        extractor: &'static str,
        stored: u32,
        current: u32,
    },
}

impl Freshness {
    pub fn is_current(&self) -> bool {
        matches!(self, Freshness::Current)
    }
}

/// A record that is valid against the current disk state and versions.
#[derive(Debug, Clone)]
pub struct Hydrated {
    pub record: FileRecord,
    /// True when recomputation ran and the record differs from what was
    /// loaded.
    pub refreshed: bool,
    pub freshness: Freshness,
}

impl UpdateCoordinator {
    /// Decide whether `record` still reflects the disk and current versions.
    pub async fn assess(&self, record: &FileRecord) -> Result<Freshness> {
        let current = self.schema_version();
        if record.version < current {
            return Ok(Freshness::SchemaOutdated {
                stored: record.version,
                current,
            });
        }

        if !self.content_matches(record).await? {
            return Ok(Freshness::ContentChanged);
        }

        if record.kind == Some(FileKind::File)
            && let Some(extractor) = self.extractors().outdated_by(record)
        {
            return Ok(Freshness::ExtractorOutdated {
                extractor: extractor.name(),
                stored: record.metadata.version(),
                current: extractor.version(),
            });
        }

        Ok(Freshness::Current)
    }

    async fn content_matches(&self, record: &FileRecord) -> Result<bool> {
        let (Some(stored_kind), Some(stored_hash)) = (record.kind, record.hash.as_deref()) else {
            return Ok(false);
        };
        if stored_kind == FileKind::Other || is_placeholder(stored_hash) {
            return Ok(false);
        }

        let path = record.path();
        let validation = |source| CatalogError::Validation {
            path: path.to_path_buf(),
            source,
        };

        let stat = self.fs().stat(path).await.map_err(validation)?;
        if stat.kind() != stored_kind {
            return Ok(false);
        }
        let hash = self
            .hasher()
            .fingerprint(path, stored_kind)
            .await
            .map_err(validation)?;
        Ok(hash == stored_hash)
    }

    /// Validate `record`, recomputing it when any check fails.
    pub async fn hydrate(&self, record: FileRecord) -> Result<Hydrated> {
        let freshness = self.assess(&record).await?;
        if freshness.is_current() {
            return Ok(Hydrated {
                record,
                refreshed: false,
                freshness,
            });
        }
        self.refresh(record, freshness).await
    }

    /// Recompute `record`, already assessed as stale for `freshness`.
    ///
    /// Used when the assessment ran on a different view of the record than
    /// the one that should be recomputed (a projected lookup).
    pub async fn refresh(&self, record: FileRecord, freshness: Freshness) -> Result<Hydrated> {
        debug!(
            target: "catalog::hydrate",
            path = %record.path().display(),
            reason = ?freshness,
            "record is stale, recomputing"
        );
        let fresh = self.recompute(&record).await?;
        Ok(Hydrated {
            refreshed: fresh != record,
            record: fresh,
            freshness,
        })
    }

    /// Records for paths the store has never seen skip validation.
    pub async fn hydrate_unseen(&self, path: &std::path::Path) -> Result<FileRecord> {
        Ok(self.recompute_path(path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;
    use crate::extract::{ExtractError, ExtractSource, ExtractorRegistry, MetadataExtractor};
    use crate::fs::InMemoryFs;
    use async_trait::async_trait;
    use monet_model::Metadata;
    use std::path::Path;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Versioned(u32);

    #[async_trait]
    impl MetadataExtractor for Versioned {
        fn name(&self) -> &'static str {
            "versioned"
        }

        fn version(&self) -> u32 {
            self.0
        }

        fn mime_types(&self) -> &'static [&'static str] {
            &[]
        }

        fn extensions(&self) -> &'static [&'static str] {
            &["dat"]
        }

        async fn extract(&self, _source: ExtractSource<'_>) -> std::result::Result<Metadata, ExtractError> {
            Ok(Metadata::new())
        }
    }

    fn coordinator(fs: Arc<InMemoryFs>, extractor_version: u32) -> UpdateCoordinator {
        let mut registry = ExtractorRegistry::empty();
        registry.register(Arc::new(Versioned(extractor_version)));
        UpdateCoordinator::new(fs, Arc::new(registry), &CatalogConfig::default())
    }

    #[tokio::test]
    async fn unchanged_record_is_current() {
        let fs = Arc::new(InMemoryFs::new());
        fs.add_file("/x.dat", "payload");
        let coordinator = coordinator(fs, 1);
        let record = coordinator
            .hydrate_unseen(Path::new("/x.dat"))
            .await
            .expect("recompute");

        let hydrated = coordinator.hydrate(record.clone()).await.expect("hydrate");
        assert_eq!(hydrated.freshness, Freshness::Current);
        assert!(!hydrated.refreshed);
        assert_eq!(hydrated.record, record);
    }

    #[tokio::test]
    async fn checks_run_in_order() {
        let fs = Arc::new(InMemoryFs::new());
        fs.add_file("/x.dat", "payload");
        let coordinator = coordinator(Arc::clone(&fs), 1);
        let mut record = coordinator
            .hydrate_unseen(Path::new("/x.dat"))
            .await
            .expect("recompute");

        record.version = 0;
        record.metadata.set_version(0);
        fs.add_file("/x.dat", "changed");
        assert!(matches!(
            coordinator.assess(&record).await.expect("assess"),
            Freshness::SchemaOutdated { stored: 0, .. }
        ));

        record.version = coordinator.schema_version();
        assert_eq!(
            coordinator.assess(&record).await.expect("assess"),
            Freshness::ContentChanged
        );

        fs.add_file("/x.dat", "payload");
        assert!(matches!(
            coordinator.assess(&record).await.expect("assess"),
            Freshness::ExtractorOutdated { extractor: "versioned", stored: 0, current: 1 }
        ));
    }

    #[tokio::test]
    async fn newer_extractor_forces_refresh() {
        let fs = Arc::new(InMemoryFs::new());
        fs.add_file("/x.dat", "payload");
        let record = coordinator(Arc::clone(&fs), 1)
            .hydrate_unseen(Path::new("/x.dat"))
            .await
            .expect("recompute");
        assert_eq!(record.metadata.version(), 1);

        let upgraded = coordinator(fs, 2);
        let hydrated = upgraded.hydrate(record).await.expect("hydrate");
        assert!(hydrated.refreshed);
        assert_eq!(hydrated.record.metadata.version(), 2);
    }

    #[tokio::test]
    async fn unreadable_path_is_a_validation_error() {
        let fs = Arc::new(InMemoryFs::new());
        fs.add_file("/x.dat", "payload");
        let coordinator = coordinator(Arc::clone(&fs), 1);
        let record = coordinator
            .hydrate_unseen(Path::new("/x.dat"))
            .await
            .expect("recompute");

        fs.remove(Path::new("/x.dat"));
        let err = coordinator.hydrate(record).await.expect_err("validation");
        assert!(matches!(err, CatalogError::Validation { .. }));
    }

    #[tokio::test]
    async fn other_records_are_always_stale() {
        let fs = Arc::new(InMemoryFs::new());
        fs.add_other("/fifo");
        let coordinator = coordinator(fs, 1);
        let record = coordinator
            .hydrate_unseen(Path::new("/fifo"))
            .await
            .expect("recompute");

        assert_eq!(
            coordinator.assess(&record).await.expect("assess"),
            Freshness::ContentChanged
        );
    }
}
