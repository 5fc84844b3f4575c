//! Iteration log: JSONL rows are authoritative, the CSV is a flat mirror
//! for spreadsheets.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::warn;

use crate::error::{LedgerError, LedgerResult};
use crate::fsio;
use crate::record::IterationRecord;

/// Column order of `iteration_log.csv`. Stable across releases.
pub const CSV_COLUMNS: [&str; 23] = [
    "run_id",
    "iteration",
    "timestamp",
    "model_version",
    "model_path",
    "weather_path",
    "simulated_path",
    "measured_path",
    "variable",
    "key_value",
    "changed_params_json",
    "n_points",
    "rmse",
    "cv_rmse",
    "mbe",
    "nmbe",
    "r2",
    "max_dev",
    "delta_cv_rmse_vs_prev",
    "delta_nmbe_vs_prev",
    "pass_ashrae14",
    "granularity",
    "note",
];

fn num(value: f64) -> String {
    format!("{value:.6}")
}

fn opt_num(value: Option<f64>) -> String {
    value.map(num).unwrap_or_default()
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// CSV header line without trailing newline.
pub fn csv_header() -> String {
    CSV_COLUMNS.join(",")
}

/// One CSV row for `record`, fields in [`CSV_COLUMNS`] order.
pub fn csv_row(record: &IterationRecord) -> LedgerResult<String> {
    let m = &record.metrics;
    let d = &record.delta_vs_previous;
    let fields = [
        record.run_id.clone(),
        record.iteration.to_string(),
        record.timestamp.to_rfc3339(),
        record.model_version_tag.clone(),
        record.model_path.display().to_string(),
        record
            .weather_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        record.simulated_path.display().to_string(),
        record.measured_path.display().to_string(),
        record.variable.clone(),
        record.key_filter.clone().unwrap_or_default(),
        serde_json::to_string(&record.changed_parameters)?,
        m.n_points.to_string(),
        num(m.rmse),
        num(m.cv_rmse),
        num(m.mbe),
        num(m.nmbe),
        opt_num(m.r2),
        num(m.max_deviation),
        opt_num(d.cv_rmse),
        opt_num(d.nmbe),
        record.passes_compliance_check.to_string(),
        m.granularity.as_str().to_string(),
        record.note.clone(),
    ];
    Ok(fields.iter().map(|f| escape(f)).collect::<Vec<_>>().join(","))
}

/// Every row of the JSONL log in file order, superseded rows included.
///
/// A malformed final line is an interrupted append and is skipped with a
/// warning; a malformed line anywhere else is corruption.
pub fn read_rows(path: &Path) -> LedgerResult<Vec<IterationRecord>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LedgerError::io(path, e)),
    };

    let lines: Vec<(usize, &str)> = content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .collect();
    let mut rows = Vec::with_capacity(lines.len());
    for (pos, (idx, line)) in lines.iter().enumerate() {
        match serde_json::from_str::<IterationRecord>(line) {
            Ok(row) => rows.push(row),
            Err(e) if pos + 1 == lines.len() && !content.ends_with('\n') => {
                warn!(log = %path.display(), line = idx + 1, error = %e, "ignoring torn final log row");
            }
            Err(e) => {
                return Err(LedgerError::Corrupt {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    reason: e.to_string(),
                })
            }
        }
    }
    Ok(rows)
}

/// Collapse raw rows to the effective record per iteration: the last row
/// written for an iteration supersedes earlier ones. Sorted by iteration.
pub fn effective(rows: Vec<IterationRecord>) -> Vec<IterationRecord> {
    let mut latest: BTreeMap<u32, IterationRecord> = BTreeMap::new();
    for row in rows {
        latest.insert(row.iteration, row);
    }
    latest.into_values().collect()
}

/// Append `record` to both logs. The JSONL append is the commit point.
pub fn append(jsonl: &Path, csv: &Path, record: &IterationRecord) -> LedgerResult<()> {
    fsio::append_line(jsonl, &serde_json::to_string(record)?)?;
    if csv_is_empty(csv)? {
        fsio::append_line(csv, &csv_header())?;
    }
    fsio::append_line(csv, &csv_row(record)?)
}

fn csv_is_empty(path: &Path) -> LedgerResult<bool> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len() == 0),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(LedgerError::io(path, e)),
    }
}

/// Regenerate the CSV mirror from JSONL rows when their row counts differ,
/// e.g. after a crash between the two appends.
pub fn reconcile_csv(csv: &Path, rows: &[IterationRecord]) -> LedgerResult<bool> {
    let existing = match fs::read_to_string(csv) {
        Ok(c) => c.lines().skip(1).filter(|l| !l.is_empty()).count(),
        Err(e) if e.kind() == ErrorKind::NotFound => 0,
        Err(e) => return Err(LedgerError::io(csv, e)),
    };
    // Quoted notes may span lines, so only a shortfall is trusted.
    if existing >= rows.len() {
        return Ok(false);
    }

    let mut out = csv_header();
    out.push('\n');
    for row in rows {
        out.push_str(&csv_row(row)?);
        out.push('\n');
    }
    fsio::write_atomic(csv, out.as_bytes())?;
    warn!(csv = %csv.display(), rows = rows.len(), "rebuilt csv log from jsonl");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MetricDelta, ParameterChange};
    use chrono::Utc;
    use epcal_core::{compute_metrics, ContentDigest, Granularity};
    use std::path::PathBuf;

    fn record(iteration: u32, note: &str) -> IterationRecord {
        let metrics = compute_metrics(&[20.5, 20.8, 22.3, 20.9], &[20.0, 21.0, 22.0, 21.0], Granularity::Hourly)
            .unwrap();
        let mut changed = BTreeMap::new();
        changed.insert(
            "infiltration_ach".to_string(),
            ParameterChange::new(Some("0.5"), "0.35"),
        );
        IterationRecord {
            run_id: "office".into(),
            iteration,
            timestamp: Utc::now(),
            model_version_tag: "base".into(),
            model_path: PathBuf::from("/m/office.idf"),
            model_snapshot: PathBuf::from("model_versions/iter_000_base.idf"),
            model_digest: ContentDigest::from_bytes(b"idf"),
            weather_path: None,
            simulated_path: PathBuf::from("/out/eplusout.csv"),
            measured_path: PathBuf::from("/data/meter.csv"),
            variable: "Zone Mean Air Temperature".into(),
            key_filter: Some("ZONE 1".into()),
            changed_parameters: changed,
            passes_compliance_check: metrics.passes(),
            metrics,
            delta_vs_previous: MetricDelta::default(),
            note: note.into(),
        }
    }

    #[test]
    fn csv_row_has_one_field_per_column_and_escapes() {
        let row = csv_row(&record(0, "tightened envelope, \"v2\"")).unwrap();
        assert!(row.ends_with("\"tightened envelope, \"\"v2\"\"\""));
        assert!(row.starts_with("office,0,"));
        assert!(row.contains(",true,hourly,"));
        assert!(row.contains("\"{\"\"infiltration_ach\"\""));
    }

    #[test]
    fn last_row_per_iteration_wins() {
        let rows = vec![record(0, "a"), record(1, "b"), record(0, "c")];
        let eff = effective(rows);
        assert_eq!(eff.len(), 2);
        assert_eq!(eff[0].note, "c");
        assert_eq!(eff[1].iteration, 1);
    }

    #[test]
    fn torn_final_row_is_ignored_but_inner_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iteration_log.jsonl");
        let good = serde_json::to_string(&record(0, "")).unwrap();

        fs::write(&path, format!("{good}\n{{\"run_id\":")).unwrap();
        assert_eq!(read_rows(&path).unwrap().len(), 1);

        fs::write(&path, format!("not json\n{good}\n")).unwrap();
        let err = read_rows(&path).unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt { line: 1, .. }));
    }

    #[test]
    fn append_writes_header_once_and_reconcile_fills_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let jsonl = dir.path().join("iteration_log.jsonl");
        let csv = dir.path().join("iteration_log.csv");

        append(&jsonl, &csv, &record(0, "")).unwrap();
        append(&jsonl, &csv, &record(1, "")).unwrap();
        let text = fs::read_to_string(&csv).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert_eq!(text.lines().next().unwrap(), csv_header());

        fs::remove_file(&csv).unwrap();
        let rows = read_rows(&jsonl).unwrap();
        assert!(reconcile_csv(&csv, &rows).unwrap());
        assert_eq!(fs::read_to_string(&csv).unwrap().lines().count(), 3);
        assert!(!reconcile_csv(&csv, &rows).unwrap());
    }
}
