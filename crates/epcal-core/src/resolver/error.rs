//! Error types for simulator discovery.

use std::path::PathBuf;

use super::{render_trace, Artifact, TraceEntry};

/// Errors produced while resolving the simulator executable and schema file.
///
/// Every variant carries the full trace so the caller can show which
/// sources were consulted and what each one yielded.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("energyplus executable not found after {} source(s):\n{}", .trace.len(), render_trace(.trace))]
    ExecutableNotFound { trace: Vec<TraceEntry> },

    #[error("energy+.idd schema file not found after {} source(s):\n{}", .trace.len(), render_trace(.trace))]
    SchemaNotFound { trace: Vec<TraceEntry> },

    #[error("{artifact} override does not exist: {}", .path.display())]
    OverrideMissing {
        artifact: Artifact,
        path: PathBuf,
        trace: Vec<TraceEntry>,
    },
}

impl ResolutionError {
    /// Trace recorded up to the point of failure.
    pub fn trace(&self) -> &[TraceEntry] {
        match self {
            ResolutionError::ExecutableNotFound { trace }
            | ResolutionError::SchemaNotFound { trace }
            | ResolutionError::OverrideMissing { trace, .. } => trace,
        }
    }
}

/// Result type for resolver operations.
pub type ResolveResult<T> = std::result::Result<T, ResolutionError>;
