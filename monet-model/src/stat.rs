use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse classification derived from a [`FileStat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
    Other,
}

impl FileKind {
    pub fn from_stat(stat: &FileStat) -> Self {
        if stat.is_file {
            FileKind::File
        } else if stat.is_directory {
            FileKind::Directory
        } else {
            FileKind::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::File => "file",
            FileKind::Directory => "directory",
            FileKind::Other => "other",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filesystem metadata snapshot taken at the last recomputation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    pub mode: u32,
    pub modified: Option<DateTime<Utc>>,
    pub is_file: bool,
    pub is_directory: bool,
}

impl FileStat {
    pub fn kind(&self) -> FileKind {
        FileKind::from_stat(self)
    }
}
