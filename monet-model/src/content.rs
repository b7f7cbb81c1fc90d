use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Describes how the bytes behind a record are materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileContent {
    /// Directory: child names as observed by the last listing.
    List { list: Vec<String> },
    /// Regular file readable from local storage.
    #[serde(rename = "localfile")]
    LocalFile { address: PathBuf },
}

impl FileContent {
    pub fn children(&self) -> Option<&[String]> {
        match self {
            FileContent::List { list } => Some(list),
            FileContent::LocalFile { .. } => None,
        }
    }

    pub fn address(&self) -> Option<&Path> {
        match self {
            FileContent::LocalFile { address } => Some(address),
            FileContent::List { .. } => None,
        }
    }
}
