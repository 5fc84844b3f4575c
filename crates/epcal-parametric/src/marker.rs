//! Persisted per-variant state, `<results_dir>/<variant>/.variant_state.json`.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use epcal_core::{ContentDigest, EnergySummary, RunResult};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{BatchError, BatchResult};

pub const MARKER_FILE: &str = ".variant_state.json";

/// Lifecycle of one variant: `Pending -> Running -> Completed | Failed`.
/// Any state may restart at `Running` when a batch is re-invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl VariantState {
    pub fn can_transition_to(self, next: VariantState) -> bool {
        use VariantState::*;
        matches!(
            (self, next),
            (_, Running) | (Running, Completed) | (Running, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VariantState::Pending => "pending",
            VariantState::Running => "running",
            VariantState::Completed => "completed",
            VariantState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for VariantState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantMarker {
    pub variant_name: String,
    pub state: VariantState,
    pub fingerprint: ContentDigest,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub run_result: Option<RunResult>,
    #[serde(default)]
    pub summary: Option<EnergySummary>,
    #[serde(default)]
    pub error: Option<String>,
}

impl VariantMarker {
    pub fn pending(variant_name: &str, fingerprint: ContentDigest) -> Self {
        Self {
            variant_name: variant_name.to_string(),
            state: VariantState::Pending,
            fingerprint,
            updated_at: Utc::now(),
            run_result: None,
            summary: None,
            error: None,
        }
    }

    pub fn path(variant_dir: &Path) -> PathBuf {
        variant_dir.join(MARKER_FILE)
    }

    /// Move to `next`, clearing outcome fields when a run restarts.
    pub fn advance(&mut self, next: VariantState) -> BatchResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(BatchError::InvalidTransition {
                variant: self.variant_name.clone(),
                from: self.state,
                to: next,
            });
        }
        if next == VariantState::Running {
            self.run_result = None;
            self.summary = None;
            self.error = None;
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a finished run, landing in `Completed` or `Failed` by its outcome.
    pub fn finish(&mut self, run: RunResult, summary: Option<EnergySummary>) -> BatchResult<()> {
        let next = if run.is_success() {
            VariantState::Completed
        } else {
            VariantState::Failed
        };
        self.advance(next)?;
        self.run_result = Some(run);
        self.summary = summary;
        Ok(())
    }

    /// Record a run that never produced a result.
    pub fn fail(&mut self, error: String) -> BatchResult<()> {
        self.advance(VariantState::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    /// Read the marker in `variant_dir`. An unreadable marker is treated as
    /// absent so the variant runs again.
    pub fn load(variant_dir: &Path) -> BatchResult<Option<Self>> {
        let path = Self::path(variant_dir);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BatchError::io(&path, e)),
        };
        match serde_json::from_slice(&bytes) {
            Ok(marker) => Ok(Some(marker)),
            Err(e) => {
                warn!(marker = %path.display(), error = %e, "ignoring unreadable variant marker");
                Ok(None)
            }
        }
    }

    pub fn store(&self, variant_dir: &Path) -> BatchResult<()> {
        write_json_atomic(&Self::path(variant_dir), self)
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> BatchResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| BatchError::io(dir, e))?;
    let data = serde_json::to_vec_pretty(value).map_err(|e| BatchError::json(path, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| BatchError::io(dir, e))?;
    tmp.write_all(&data).map_err(|e| BatchError::io(path, e))?;
    tmp.as_file().sync_all().map_err(|e| BatchError::io(path, e))?;
    tmp.persist(path).map_err(|e| BatchError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_allows_restart_but_not_skipping_running() {
        use VariantState::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Failed.can_transition_to(Running));
        assert!(Completed.can_transition_to(Running));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
    }

    #[test]
    fn marker_round_trips_and_restart_clears_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let mut marker = VariantMarker::pending("triple", ContentDigest::from_bytes(b"plan"));
        marker.advance(VariantState::Running).unwrap();
        marker.error = Some("spawn failed".into());
        marker.advance(VariantState::Failed).unwrap();
        marker.store(dir.path()).unwrap();

        let mut loaded = VariantMarker::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, marker);

        loaded.advance(VariantState::Running).unwrap();
        assert!(loaded.error.is_none());
        let err = loaded.advance(VariantState::Pending).unwrap_err();
        assert!(matches!(err, BatchError::InvalidTransition { .. }));
    }

    fn clean_run(dir: &Path) -> RunResult {
        RunResult {
            status: epcal_core::RunStatus::Completed,
            exit_code: Some(0),
            duration_secs: 1.0,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
            artifacts_dir: dir.to_path_buf(),
            fatal_count: 0,
            severe_count: 0,
            warning_count: 0,
            log_incomplete: false,
        }
    }

    #[test]
    fn finish_follows_run_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let mut marker = VariantMarker::pending("double", ContentDigest::from_bytes(b"plan"));
        marker.advance(VariantState::Running).unwrap();
        marker.finish(clean_run(dir.path()), None).unwrap();
        assert_eq!(marker.state, VariantState::Completed);
        assert!(marker.run_result.is_some());

        let mut marker = VariantMarker::pending("double", ContentDigest::from_bytes(b"plan"));
        marker.advance(VariantState::Running).unwrap();
        let mut run = clean_run(dir.path());
        run.fatal_count = 1;
        marker.finish(run, None).unwrap();
        assert_eq!(marker.state, VariantState::Failed);
    }

    #[test]
    fn outcome_without_running_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut marker = VariantMarker::pending("double", ContentDigest::from_bytes(b"plan"));

        let err = marker.finish(clean_run(dir.path()), None).unwrap_err();
        assert!(matches!(err, BatchError::InvalidTransition { .. }));
        assert_eq!(marker.state, VariantState::Pending);
        assert!(marker.run_result.is_none());

        let err = marker.fail("spawn failed".into()).unwrap_err();
        assert!(matches!(err, BatchError::InvalidTransition { .. }));
        assert!(marker.error.is_none());
    }

    #[test]
    fn unreadable_marker_counts_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(VariantMarker::load(dir.path()).unwrap().is_none());
        fs::write(dir.path().join(MARKER_FILE), "{not json").unwrap();
        assert!(VariantMarker::load(dir.path()).unwrap().is_none());
    }
}
