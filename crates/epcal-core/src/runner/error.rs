//! Error types for the process runner.

use std::path::PathBuf;

use crate::resolver::ResolutionError;

/// Failures that prevent a simulation from producing a [`super::RunResult`].
///
/// A non-zero exit or a timeout is not an error; both come back as a result
/// with the matching status.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("invalid run spec: {0}")]
    Validation(String),

    #[error("{action} {}: {source}", .path.display())]
    Environment {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("io error while running simulation: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runner operations.
pub type RunnerResult<T> = std::result::Result<T, RunError>;
