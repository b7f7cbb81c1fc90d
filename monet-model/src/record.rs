use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::{
    FileContent, FileKind, FileStat, Metadata, RecordId,
    error::{ModelError, Result},
};

/// Canonical string form of a path used for lookups.
///
/// Trailing and repeated separators and `.` components are dropped, so
/// `/a/./b/` and `/a/b` address the same record. `..` is kept as written.
pub fn path_key(path: &Path) -> String {
    let normalized: PathBuf = path
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect();
    if normalized.as_os_str().is_empty() {
        ".".to_string()
    } else {
        normalized.to_string_lossy().into_owned()
    }
}

/// One cataloged filesystem path and everything derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Storage identity; assigned by the backend on first insert.
    #[serde(skip)]
    pub id: Option<RecordId>,
    /// Every path this logical file has held. The last entry is current.
    pub history: Vec<PathBuf>,
    #[serde(default)]
    pub stat: Option<FileStat>,
    #[serde(rename = "type", default)]
    pub kind: Option<FileKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub content: Option<FileContent>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Schema version stamped at the last successful recomputation.
    #[serde(default)]
    pub version: u32,
    #[serde(skip)]
    partial: bool,
}

impl FileRecord {
    /// Fresh record for a path the catalog has never seen.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            id: None,
            history: vec![PathBuf::from(path_key(path.as_ref()))],
            stat: None,
            kind: None,
            mime: None,
            hash: None,
            content: None,
            metadata: Metadata::new(),
            version: 0,
            partial: false,
        }
    }

    pub fn path(&self) -> &Path {
        self.history
            .last()
            .map(PathBuf::as_path)
            .unwrap_or_else(|| Path::new(""))
    }

    pub fn path_key(&self) -> String {
        path_key(self.path())
    }

    /// Record that the file now lives at `path`. History is append-only.
    pub fn renamed_to(&mut self, path: impl AsRef<Path>) {
        let next = PathBuf::from(path_key(path.as_ref()));
        if self.history.last() != Some(&next) {
            self.history.push(next);
        }
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    /// Whether some fields were left out when this record was loaded.
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn mark_partial(&mut self) {
        self.partial = true;
    }

    pub fn extension(&self) -> Option<String> {
        self.path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }

    /// Reject documents that cannot be addressed by path.
    pub fn validate_identity(&self) -> Result<()> {
        match self.history.last() {
            None => Err(ModelError::EmptyHistory),
            Some(path) if path.as_os_str().is_empty() => {
                Err(ModelError::InvalidRecord {
                    path: path.clone(),
                    reason: "current path is empty".into(),
                })
            }
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_key_strips_trailing_separators() {
        assert_eq!(path_key(Path::new("/a/b/")), "/a/b");
        assert_eq!(path_key(Path::new("/a/b")), "/a/b");
        assert_eq!(path_key(Path::new("/")), "/");
    }

    #[test]
    fn path_key_drops_current_dir_components() {
        assert_eq!(path_key(Path::new("./sub")), "sub");
        assert_eq!(path_key(Path::new("/a/./b//c")), "/a/b/c");
        assert_eq!(path_key(Path::new(".")), ".");
        assert_eq!(path_key(Path::new("/a/../b")), "/a/../b");
    }

    #[test]
    fn history_tracks_renames_append_only() {
        let mut record = FileRecord::new("/photos/a.jpg");
        record.renamed_to("/photos/b.jpg");
        record.renamed_to("/photos/b.jpg");

        assert_eq!(record.history.len(), 2);
        assert_eq!(record.path(), Path::new("/photos/b.jpg"));
        assert_eq!(record.history[0], PathBuf::from("/photos/a.jpg"));
    }

    #[test]
    fn document_shape_uses_type_and_tagged_content() {
        let mut record = FileRecord::new("/a");
        record.kind = Some(FileKind::Directory);
        record.content = Some(FileContent::List {
            list: vec!["x.txt".into()],
        });

        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["type"], json!("directory"));
        assert_eq!(value["content"], json!({"type": "list", "list": ["x.txt"]}));
        assert!(value.get("id").is_none(), "storage id is never embedded");
    }

    #[test]
    fn empty_history_is_rejected() {
        let record: FileRecord =
            serde_json::from_value(json!({"history": []})).expect("deserialize");
        assert!(matches!(
            record.validate_identity(),
            Err(ModelError::EmptyHistory)
        ));
    }
}
