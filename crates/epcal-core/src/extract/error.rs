//! Error types for result extraction.

use std::path::PathBuf;

/// Errors produced while reading simulator artifacts or measured data.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no *{ext} artifact in {}", .dir.display())]
    ArtifactNotFound { dir: PathBuf, ext: String },

    #[error("variable '{variable}' (key '{key}') not found in {}; available: {available}", .path.display())]
    VariableNotFound {
        path: PathBuf,
        variable: String,
        key: String,
        available: String,
    },

    #[error("no data rows for '{variable}' in {}", .path.display())]
    NoData { path: PathBuf, variable: String },

    #[error("column '{column}' not found in {}; available: {available}", .path.display())]
    ColumnNotFound {
        path: PathBuf,
        column: String,
        available: String,
    },

    #[error("malformed {}: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("sqlite error reading {}: {source}", .path.display())]
    Sql {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("io error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        ExtractError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn sql(path: &std::path::Path, source: rusqlite::Error) -> Self {
        ExtractError::Sql {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for extraction operations.
pub type ExtractResult<T> = std::result::Result<T, ExtractError>;
