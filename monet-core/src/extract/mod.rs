//! Type-specific metadata enrichment.
//!
//! Extractors are resolved once per record from its MIME type, falling back
//! to the file extension. Each declares a version; a stored record whose
//! `metadata.version` is lower than the resolved extractor's version is
//! considered stale.

#[cfg(feature = "images")]
pub mod image;

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use monet_model::{FileRecord, FileStat, Metadata};
use thiserror::Error;
use tokio::io::AsyncReadExt;

use crate::error::RecomputeError;
use crate::fs::FileSystem;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("could not decode: {0}")]
    Decode(String),

    #[error("extraction task failed: {0}")]
    Task(String),
}

/// What an extractor gets to look at.
#[derive(Clone, Copy)]
pub struct ExtractSource<'a> {
    pub path: &'a Path,
    pub stat: &'a FileStat,
    pub fs: &'a dyn FileSystem,
}

impl fmt::Debug for ExtractSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractSource")
            .field("path", &self.path)
            .field("size", &self.stat.size)
            .finish()
    }
}

impl ExtractSource<'_> {
    pub async fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut reader = self.fs.open(self.path).await?;
        let mut bytes = Vec::with_capacity(self.stat.size as usize);
        reader.read_to_end(&mut bytes).await?;
        Ok(bytes)
    }
}

#[async_trait]
pub trait MetadataExtractor: Send + Sync + fmt::Debug {
    /// Stable identifier used in logs and errors.
    fn name(&self) -> &'static str;

    /// Bumped whenever the produced metadata changes shape or content.
    fn version(&self) -> u32;

    fn mime_types(&self) -> &'static [&'static str];

    /// Lowercase extensions without the leading dot.
    fn extensions(&self) -> &'static [&'static str];

    async fn extract(&self, source: ExtractSource<'_>) -> Result<Metadata, ExtractError>;
}

/// Extractors keyed by MIME type and extension.
#[derive(Default, Clone)]
pub struct ExtractorRegistry {
    by_mime: HashMap<&'static str, Arc<dyn MetadataExtractor>>,
    by_extension: HashMap<&'static str, Arc<dyn MetadataExtractor>>,
}

impl fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self
            .by_mime
            .values()
            .chain(self.by_extension.values())
            .map(|extractor| extractor.name())
            .collect();
        names.sort_unstable();
        names.dedup();
        f.debug_struct("ExtractorRegistry")
            .field("extractors", &names)
            .finish()
    }
}

impl ExtractorRegistry {
    /// Registry with no extractors; every file gets empty metadata.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in extractors enabled by crate features.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::default();
        #[cfg(feature = "images")]
        registry.register(Arc::new(image::ImageExtractor::new()));
        registry
    }

    /// Later registrations win for overlapping MIME types and extensions.
    pub fn register(&mut self, extractor: Arc<dyn MetadataExtractor>) {
        for mime in extractor.mime_types() {
            self.by_mime.insert(mime, Arc::clone(&extractor));
        }
        for ext in extractor.extensions() {
            self.by_extension.insert(ext, Arc::clone(&extractor));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_mime.is_empty() && self.by_extension.is_empty()
    }

    pub fn resolve(
        &self,
        mime: Option<&str>,
        extension: Option<&str>,
    ) -> Option<Arc<dyn MetadataExtractor>> {
        mime.and_then(|mime| self.by_mime.get(mime))
            .or_else(|| extension.and_then(|ext| self.by_extension.get(ext)))
            .cloned()
    }

    pub fn resolve_for(&self, record: &FileRecord) -> Option<Arc<dyn MetadataExtractor>> {
        let extension = record.extension();
        self.resolve(record.mime.as_deref(), extension.as_deref())
    }

    /// The extractor responsible for `record`, if it is newer than the one
    /// that produced the record's metadata.
    pub fn outdated_by(&self, record: &FileRecord) -> Option<Arc<dyn MetadataExtractor>> {
        self.resolve_for(record)
            .filter(|extractor| record.metadata.version() < extractor.version())
    }

    /// Run `extractor` and stamp its version onto the result.
    pub async fn run(
        &self,
        extractor: &dyn MetadataExtractor,
        source: ExtractSource<'_>,
    ) -> Result<Metadata, RecomputeError> {
        let mut metadata =
            extractor
                .extract(source)
                .await
                .map_err(|e| RecomputeError::Extract {
                    extractor: extractor.name(),
                    path: source.path.to_path_buf(),
                    message: e.to_string(),
                })?;
        metadata.set_version(extractor.version());
        Ok(metadata)
    }
}

/// MIME type guessed from a lowercase extension.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    let mime = match extension {
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "ico" => "image/x-icon",
        "flif" => "image/flif",
        "svg" => "image/svg+xml",
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        _ => return None,
    };
    Some(mime)
}
