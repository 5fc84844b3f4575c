//! Measured (metered) data and timestamp alignment against simulated series.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::csv::read_table;
use super::error::{ExtractError, ExtractResult};
use super::series::{match_column, parse_simulator_datetime, TimeSeries, Timestamp};

static ISO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\d{4}-(\d{1,2})-(\d{1,2})[T\s](\d{1,2})").expect("iso pattern is a valid regex")
});
static US_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,2})/(\d{1,2})/\d{2,4}\s+(\d{1,2})").expect("us pattern is a valid regex")
});

const DATETIME_HEADERS: [&str; 7] = [
    "datetime",
    "date_time",
    "timestamp",
    "date/time",
    "date time",
    "date",
    "time",
];

fn normalize_header(h: &str) -> String {
    h.replace('\u{feff}', "").trim().to_lowercase()
}

/// Parse ISO (`2024-01-15T14:00`), US (`01/15/2024 14:00`) or simulator
/// style (`01/15  14:00:00`) timestamps.
pub fn parse_datetime(text: &str) -> Option<Timestamp> {
    for re in [&*ISO_RE, &*US_RE] {
        if let Some(c) = re.captures(text) {
            return Some(Timestamp::new(
                c[1].parse().ok()?,
                c[2].parse().ok()?,
                c[3].parse().ok()?,
            ));
        }
    }
    parse_simulator_datetime(text)
}

fn cell(row: &[String], idx: usize) -> Option<&str> {
    row.get(idx).map(|s| s.trim())
}

fn parse_month_day_hour(row: &[String], m: usize, d: usize, h: usize) -> Option<Timestamp> {
    Some(Timestamp::new(
        cell(row, m)?.parse().ok()?,
        cell(row, d)?.parse().ok()?,
        cell(row, h)?.parse().ok()?,
    ))
}

/// Load measured data.
///
/// The file needs either `Month`, `Day`, `Hour` columns or a single
/// date-time column. Without `column`, the last non-time column holds the
/// values.
pub fn load_measured_csv(path: &Path, column: Option<&str>) -> ExtractResult<TimeSeries> {
    let table = read_table(path)?;
    let lower: Vec<String> = table.headers.iter().map(|h| normalize_header(h)).collect();

    let find = |name: &str| lower.iter().position(|h| h == name);
    let (month, day, hour) = (find("month"), find("day"), find("hour"));
    let datetime = lower
        .iter()
        .rposition(|h| DATETIME_HEADERS.contains(&h.as_str()));

    let mdh = match (month, day, hour) {
        (Some(m), Some(d), Some(h)) => Some((m, d, h)),
        _ => None,
    };
    if mdh.is_none() && datetime.is_none() {
        return Err(ExtractError::Malformed {
            path: path.to_path_buf(),
            reason: format!(
                "expected Month/Day/Hour columns or a DateTime column, found: {}",
                table.headers.join(", ")
            ),
        });
    }

    let time_cols = [month, day, hour, datetime];
    let value_col = match column {
        Some(c) => match_column(&lower, &normalize_header(c)),
        None => (0..lower.len()).rev().find(|i| !time_cols.contains(&Some(*i))),
    };
    let Some(value_col) = value_col else {
        return Err(ExtractError::ColumnNotFound {
            path: path.to_path_buf(),
            column: column.unwrap_or("<value column>").to_string(),
            available: table.headers.join(", "),
        });
    };

    let mut series = TimeSeries {
        name: table.headers[value_col].clone(),
        ..TimeSeries::default()
    };

    let last = table.rows.len().saturating_sub(1);
    for (i, row) in table.rows.iter().enumerate() {
        let ts = match (mdh, datetime) {
            (Some((m, d, h)), _) => parse_month_day_hour(row, m, d, h),
            (None, Some(dt)) => cell(row, dt).and_then(parse_datetime),
            (None, None) => None,
        };
        let value = cell(row, value_col).and_then(|v| v.parse::<f64>().ok());

        match (ts, value) {
            (Some(ts), Some(v)) => series.points.push((ts, v)),
            _ if i == last && table.truncated => series.incomplete = true,
            _ => series.skipped_rows += 1,
        }
    }
    Ok(series)
}

/// Two series paired on matching timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignedSeries {
    pub timestamps: Vec<Timestamp>,
    pub simulated: Vec<f64>,
    pub measured: Vec<f64>,
    /// Simulated points without a measured counterpart.
    pub unmatched_simulated: usize,
    /// Measured points never matched by the simulation.
    pub unmatched_measured: usize,
}

impl AlignedSeries {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Pair simulated and measured values on `(month, day, hour)`, in simulated
/// order. Duplicate measured timestamps keep the last value.
pub fn align(simulated: &TimeSeries, measured: &TimeSeries) -> AlignedSeries {
    let lookup: HashMap<Timestamp, f64> = measured.points.iter().copied().collect();
    let mut out = AlignedSeries::default();

    for (ts, sim) in &simulated.points {
        match lookup.get(ts) {
            Some(meas) => {
                out.timestamps.push(*ts);
                out.simulated.push(*sim);
                out.measured.push(*meas);
            }
            None => out.unmatched_simulated += 1,
        }
    }
    out.unmatched_measured = lookup.len().saturating_sub(out.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, body).unwrap();
        p
    }

    #[test]
    fn month_day_hour_columns_default_to_last_value_column() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(
            dir.path(),
            "m.csv",
            "Month,Day,Hour,Outdoor,Zone Temp\n1,1,1,-3,20.0\n1,1,2,-4,21.0\nbad,row\n",
        );
        let s = load_measured_csv(&p, None).unwrap();
        assert_eq!(s.name, "Zone Temp");
        assert_eq!(s.values(), vec![20.0, 21.0]);
        assert_eq!(s.skipped_rows, 1);
    }

    #[test]
    fn datetime_column_accepts_iso_and_us_forms() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(
            dir.path(),
            "m.csv",
            "Timestamp,kWh\n2024-01-15T14:00:00,3.5\n01/15/2024 15:00,4.0\n",
        );
        let s = load_measured_csv(&p, Some("kwh")).unwrap();
        assert_eq!(
            s.points,
            vec![
                (Timestamp::new(1, 15, 14), 3.5),
                (Timestamp::new(1, 15, 15), 4.0)
            ]
        );
    }

    #[test]
    fn missing_time_columns_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), "m.csv", "a,b\n1,2\n");
        let err = load_measured_csv(&p, None).unwrap_err();
        assert!(err.to_string().contains("Month/Day/Hour"));
    }

    #[test]
    fn align_keeps_only_shared_timestamps() {
        let sim = TimeSeries {
            points: vec![
                (Timestamp::new(1, 1, 1), 20.5),
                (Timestamp::new(1, 1, 2), 20.8),
                (Timestamp::new(1, 1, 3), 22.3),
            ],
            ..TimeSeries::default()
        };
        let meas = TimeSeries {
            points: vec![
                (Timestamp::new(1, 1, 2), 21.0),
                (Timestamp::new(1, 1, 1), 20.0),
                (Timestamp::new(2, 1, 1), 5.0),
            ],
            ..TimeSeries::default()
        };

        let a = align(&sim, &meas);
        assert_eq!(a.simulated, vec![20.5, 20.8]);
        assert_eq!(a.measured, vec![20.0, 21.0]);
        assert_eq!(a.unmatched_simulated, 1);
        assert_eq!(a.unmatched_measured, 1);
    }
}
