//! Error types for the calibration ledger.

use std::path::PathBuf;

/// Errors produced by ledger operations.
///
/// Every variant names the run, iteration or file involved.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("iteration {iteration} already recorded for run '{run_id}' (use force to overwrite)")]
    DuplicateIteration { run_id: String, iteration: u32 },

    #[error("timed out after {waited_ms}ms waiting for ledger lock {} (remove it if no other process is recording)", .path.display())]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("invalid iteration: {0}")]
    InvalidIteration(String),

    #[error("ledger at {} belongs to run '{found}', not '{expected}'", .path.display())]
    RunIdMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("iteration {iteration} not found in run '{run_id}'")]
    NotFound { run_id: String, iteration: u32 },

    #[error("corrupt ledger file {} at line {line}: {reason}", .path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LedgerError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        LedgerError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_run_and_iteration() {
        let err = LedgerError::DuplicateIteration {
            run_id: "office".to_string(),
            iteration: 4,
        };
        assert_eq!(
            err.to_string(),
            "iteration 4 already recorded for run 'office' (use force to overwrite)"
        );
    }

    #[test]
    fn lock_timeout_names_lock_file() {
        let err = LedgerError::LockTimeout {
            path: PathBuf::from("/runs/office/.ledger.lock"),
            waited_ms: 5000,
        };
        assert!(err.to_string().contains("/runs/office/.ledger.lock"));
    }
}
