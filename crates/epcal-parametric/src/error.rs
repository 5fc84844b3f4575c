//! Error types for parametric batches.
//!
//! Only batch-level problems surface here. A variant that fails to patch,
//! simulate or extract is reported in its `VariantResult` instead.

use std::path::{Path, PathBuf};

use crate::marker::VariantState;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("invalid variant specification: {0}")]
    InvalidSpec(String),

    #[error("variant '{variant}' cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        variant: String,
        from: VariantState,
        to: VariantState,
    },

    #[error("variant '{variant}' could not be simulated: {source}")]
    Simulation {
        variant: String,
        #[source]
        source: epcal_core::RunError,
    },

    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl BatchError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        BatchError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
        BatchError::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type BatchResult<T> = std::result::Result<T, BatchError>;
