//! The calibration ledger: an append-only record of calibration iterations
//! for one run directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use epcal_core::{emit_iteration_forced, emit_iteration_recorded, ContentDigest};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{LedgerError, LedgerResult};
use crate::fsio;
use crate::layout::LedgerLayout;
use crate::lock::{LedgerLock, DEFAULT_LOCK_TIMEOUT};
use crate::log;
use crate::record::{IterationDraft, IterationRecord, MetricDelta, RecordOptions};
use crate::summary::LedgerSummary;

/// Contents of `run_meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Handle on one calibration run directory.
#[derive(Debug, Clone)]
pub struct CalibrationLedger {
    layout: LedgerLayout,
    run_id: String,
    lock_timeout: Duration,
}

impl CalibrationLedger {
    /// Open or create the run directory.
    ///
    /// The run id defaults to the directory name. Reopening with a different
    /// id than the one in `run_meta.json` fails with
    /// [`LedgerError::RunIdMismatch`].
    pub fn open(run_dir: impl Into<PathBuf>, run_id: Option<&str>) -> LedgerResult<Self> {
        let layout = LedgerLayout::new(run_dir);
        for dir in layout.subdirs() {
            fs::create_dir_all(&dir).map_err(|e| LedgerError::io(&dir, e))?;
        }

        let now = Utc::now();
        let meta = match read_meta(&layout.meta())? {
            Some(mut meta) => {
                if let Some(requested) = run_id {
                    if requested != meta.run_id {
                        return Err(LedgerError::RunIdMismatch {
                            path: layout.root().to_path_buf(),
                            expected: requested.to_string(),
                            found: meta.run_id,
                        });
                    }
                }
                meta.updated_at = now;
                meta
            }
            None => {
                let run_id = match run_id {
                    Some(id) if !id.trim().is_empty() => id.trim().to_string(),
                    _ => default_run_id(layout.root()),
                };
                info!(run_id = %run_id, dir = %layout.root().display(), "created calibration run");
                RunMeta {
                    run_id,
                    created_at: now,
                    updated_at: now,
                }
            }
        };
        fsio::write_atomic(&layout.meta(), &serde_json::to_vec_pretty(&meta)?)?;

        Ok(Self {
            layout,
            run_id: meta.run_id,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// Override how long `record` waits for a concurrent writer.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &LedgerLayout {
        &self.layout
    }

    /// Commit one iteration.
    ///
    /// Artifacts are written first (model snapshot, metrics file, note),
    /// then the log row is appended. A record is visible only once its log
    /// row exists.
    pub fn record(&self, draft: IterationDraft, opts: RecordOptions) -> LedgerResult<IterationRecord> {
        validate(&draft)?;
        let model_bytes =
            fs::read(&draft.model_path).map_err(|e| LedgerError::io(&draft.model_path, e))?;

        let _lock = LedgerLock::acquire(&self.layout.lock(), self.lock_timeout)?;

        let jsonl = self.layout.jsonl_log();
        let csv = self.layout.csv_log();
        fsio::repair_torn_tail(&jsonl)?;
        fsio::repair_torn_tail(&csv)?;
        let raw = log::read_rows(&jsonl)?;
        log::reconcile_csv(&csv, &raw)?;
        let existing = log::effective(raw);

        if existing.iter().any(|r| r.iteration == draft.iteration) {
            if !opts.force {
                return Err(LedgerError::DuplicateIteration {
                    run_id: self.run_id.clone(),
                    iteration: draft.iteration,
                });
            }
            emit_iteration_forced(&self.run_id, draft.iteration);
        }

        let previous = existing
            .iter()
            .filter(|r| r.iteration < draft.iteration)
            .max_by_key(|r| r.iteration);
        let delta = match previous {
            Some(prev) => MetricDelta {
                previous_iteration: Some(prev.iteration),
                cv_rmse: Some(draft.metrics.cv_rmse - prev.metrics.cv_rmse),
                nmbe: Some(draft.metrics.nmbe - prev.metrics.nmbe),
            },
            None => MetricDelta::default(),
        };

        let tag = draft
            .model_version_tag
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| file_stem(&draft.model_path));
        let ext = draft
            .model_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("idf")
            .to_ascii_lowercase();
        let snapshot = LedgerLayout::model_snapshot(draft.iteration, &tag, &ext);

        let record = IterationRecord {
            run_id: self.run_id.clone(),
            iteration: draft.iteration,
            timestamp: Utc::now(),
            model_version_tag: tag,
            model_path: draft.model_path,
            model_snapshot: snapshot,
            model_digest: ContentDigest::from_bytes(&model_bytes),
            weather_path: draft.weather_path,
            simulated_path: draft.simulated_path,
            measured_path: draft.measured_path,
            variable: draft.variable,
            key_filter: draft.key_filter,
            changed_parameters: draft.changed_parameters,
            passes_compliance_check: draft.metrics.passes(),
            metrics: draft.metrics,
            delta_vs_previous: delta,
            note: draft.note,
        };

        fsio::write_atomic(&self.layout.root().join(&record.model_snapshot), &model_bytes)?;
        fsio::write_atomic(
            &self.layout.metrics_file(record.iteration),
            &serde_json::to_vec_pretty(&record)?,
        )?;
        fsio::write_atomic(
            &self.layout.note_file(record.iteration),
            render_note(&record)?.as_bytes(),
        )?;

        log::append(&jsonl, &csv, &record)?;
        debug!(run_id = %self.run_id, iteration = record.iteration, "log row committed");

        self.touch_meta()?;
        emit_iteration_recorded(
            &self.run_id,
            record.iteration,
            record.metrics.cv_rmse,
            record.metrics.nmbe,
            record.passes_compliance_check,
        );
        Ok(record)
    }

    /// Effective records ordered by iteration.
    pub fn iterations(&self) -> LedgerResult<Vec<IterationRecord>> {
        Ok(log::effective(log::read_rows(&self.layout.jsonl_log())?))
    }

    pub fn get(&self, iteration: u32) -> LedgerResult<IterationRecord> {
        self.iterations()?
            .into_iter()
            .find(|r| r.iteration == iteration)
            .ok_or_else(|| LedgerError::NotFound {
                run_id: self.run_id.clone(),
                iteration,
            })
    }

    /// Summary built from persisted log rows only.
    pub fn summary(&self) -> LedgerResult<LedgerSummary> {
        Ok(LedgerSummary::from_records(&self.run_id, &self.iterations()?))
    }

    fn touch_meta(&self) -> LedgerResult<()> {
        let path = self.layout.meta();
        let mut meta = read_meta(&path)?.unwrap_or_else(|| RunMeta {
            run_id: self.run_id.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        meta.updated_at = Utc::now();
        fsio::write_atomic(&path, &serde_json::to_vec_pretty(&meta)?)
    }
}

fn read_meta(path: &Path) -> LedgerResult<Option<RunMeta>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(LedgerError::io(path, e)),
    }
}

fn default_run_id(root: &Path) -> String {
    root.canonicalize()
        .unwrap_or_else(|_| root.to_path_buf())
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("run")
        .to_string()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("model")
        .to_string()
}

fn validate(draft: &IterationDraft) -> LedgerResult<()> {
    if draft.variable.trim().is_empty() {
        return Err(LedgerError::InvalidIteration(format!(
            "iteration {}: variable name is empty",
            draft.iteration
        )));
    }
    if draft.metrics.n_points == 0 {
        return Err(LedgerError::InvalidIteration(format!(
            "iteration {}: metrics cover zero points",
            draft.iteration
        )));
    }
    if !draft.model_path.is_file() {
        return Err(LedgerError::InvalidIteration(format!(
            "iteration {}: model file {} does not exist",
            draft.iteration,
            draft.model_path.display()
        )));
    }
    Ok(())
}

fn render_note(record: &IterationRecord) -> LedgerResult<String> {
    let m = &record.metrics;
    let mut out = format!("# Iteration {}\n\n", record.iteration);
    out.push_str(&format!("- run_id: `{}`\n", record.run_id));
    out.push_str(&format!("- model_version: `{}`\n", record.model_version_tag));
    out.push_str(&format!("- model_snapshot: `{}`\n", record.model_snapshot.display()));
    out.push_str(&format!("- model_digest: `{}`\n", record.model_digest.short()));
    out.push_str(&format!("- simulated: `{}`\n", record.simulated_path.display()));
    out.push_str(&format!("- measured: `{}`\n", record.measured_path.display()));
    out.push_str(&format!("- variable: `{}`\n", record.variable));
    if let Some(key) = &record.key_filter {
        out.push_str(&format!("- key_value: `{key}`\n"));
    }
    out.push_str(&format!("- data_points: `{}`\n", m.n_points));
    out.push_str(&format!("- cv_rmse: `{:.4}`\n", m.cv_rmse));
    out.push_str(&format!("- nmbe: `{:.4}`\n", m.nmbe));
    out.push_str(&format!("- pass_ashrae14: `{}`\n", record.passes_compliance_check));
    if !record.note.is_empty() {
        out.push_str(&format!("- note: {}\n", record.note));
    }
    out.push_str("\n## Changed Params\n\n```json\n");
    out.push_str(&serde_json::to_string_pretty(&record.changed_parameters)?);
    out.push_str("\n```\n");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use epcal_core::{compute_metrics, Granularity};

    fn draft(dir: &Path, iteration: u32, sim: &[f64]) -> IterationDraft {
        let model = dir.join("office.idf");
        if !model.exists() {
            fs::write(&model, "Version,23.2;\n").unwrap();
        }
        IterationDraft {
            iteration,
            model_path: model,
            model_version_tag: None,
            weather_path: None,
            simulated_path: dir.join("eplusout.csv"),
            measured_path: dir.join("meter.csv"),
            variable: "Zone Mean Air Temperature".into(),
            key_filter: None,
            changed_parameters: BTreeMap::new(),
            metrics: compute_metrics(sim, &[20.0, 21.0, 22.0, 21.0], Granularity::Hourly).unwrap(),
            note: String::new(),
        }
    }

    #[test]
    fn open_defaults_run_id_to_directory_name() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("office_cal");
        let ledger = CalibrationLedger::open(&run_dir, None).unwrap();
        assert_eq!(ledger.run_id(), "office_cal");
        assert!(run_dir.join("run_meta.json").is_file());
        assert!(run_dir.join("model_versions").is_dir());
    }

    #[test]
    fn reopen_preserves_created_at_and_rejects_other_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let first = CalibrationLedger::open(dir.path(), Some("alpha")).unwrap();
        let created = read_meta(&first.layout().meta()).unwrap().unwrap().created_at;

        let again = CalibrationLedger::open(dir.path(), None).unwrap();
        assert_eq!(again.run_id(), "alpha");
        let meta = read_meta(&again.layout().meta()).unwrap().unwrap();
        assert_eq!(meta.created_at, created);

        let err = CalibrationLedger::open(dir.path(), Some("beta")).unwrap_err();
        assert!(matches!(err, LedgerError::RunIdMismatch { .. }));
    }

    #[test]
    fn record_writes_artifacts_and_note() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CalibrationLedger::open(dir.path().join("run"), None).unwrap();
        let mut d = draft(dir.path(), 0, &[20.5, 20.8, 22.3, 20.9]);
        d.model_version_tag = Some("Base Case".into());
        d.note = "baseline".into();

        let rec = ledger.record(d, RecordOptions::default()).unwrap();
        assert_eq!(rec.model_version_tag, "Base Case");
        assert!(rec.passes_compliance_check);
        assert_eq!(rec.delta_vs_previous, MetricDelta::default());

        let root = ledger.root();
        assert!(root.join("model_versions/iter_000_base_case.idf").is_file());
        assert!(root.join("metrics/iter_000_metrics.json").is_file());
        let note = fs::read_to_string(root.join("notes/iter_000.md")).unwrap();
        assert!(note.starts_with("# Iteration 0"));
        assert!(note.contains("- note: baseline"));
        assert!(!root.join(".ledger.lock").exists());
    }

    #[test]
    fn record_rejects_missing_model_and_empty_series() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CalibrationLedger::open(dir.path().join("run"), None).unwrap();

        let mut d = draft(dir.path(), 0, &[20.5, 20.8, 22.3, 20.9]);
        d.model_path = dir.path().join("missing.idf");
        let err = ledger.record(d, RecordOptions::default()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidIteration(_)));

        let mut d = draft(dir.path(), 0, &[20.5, 20.8, 22.3, 20.9]);
        d.variable = "  ".into();
        assert!(ledger.record(d, RecordOptions::default()).is_err());
        assert!(ledger.iterations().unwrap().is_empty());
    }

    #[test]
    fn get_missing_iteration_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CalibrationLedger::open(dir.path(), Some("r")).unwrap();
        let err = ledger.get(3).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { iteration: 3, .. }));
    }
}
