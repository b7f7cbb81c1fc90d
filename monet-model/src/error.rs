use std::fmt::{self, Display};
use std::path::PathBuf;

/// Errors produced by model constructors and validation routines.
#[derive(Debug)]
pub enum ModelError {
    /// A stored document has no path history and cannot be addressed.
    EmptyHistory,
    InvalidRecord { path: PathBuf, reason: String },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::EmptyHistory => {
                write!(f, "record has an empty path history")
            }
            ModelError::InvalidRecord { path, reason } => {
                write!(f, "invalid record {}: {reason}", path.display())
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
