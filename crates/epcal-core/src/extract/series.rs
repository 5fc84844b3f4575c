//! Named time series from the simulator's SQL result store or ReadVars CSV.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};

use super::csv::{read_table, CsvTable};
use super::error::{ExtractError, ExtractResult};

static DATETIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,2})/(\d{1,2})\s+(\d{1,2}):").expect("datetime pattern is a valid regex")
});
static UNITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]").expect("units pattern is a valid regex"));

/// Calendar position of a reported value. Hours follow the simulator's
/// 1..=24 "hour ending" convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

impl Timestamp {
    pub fn new(month: u32, day: u32, hour: u32) -> Self {
        Self { month, day, hour }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}/{:02} {:02}:00", self.month, self.day, self.hour)
    }
}

/// One loaded series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub name: String,
    pub key: String,
    pub units: String,
    pub points: Vec<(Timestamp, f64)>,
    /// Rows that could not be parsed and were dropped.
    pub skipped_rows: usize,
    /// Source ended mid-row.
    pub incomplete: bool,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|(_, v)| *v).collect()
    }
}

pub(crate) fn open_read_only(path: &Path) -> ExtractResult<Connection> {
    if !path.is_file() {
        return Err(ExtractError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        ));
    }
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| ExtractError::sql(path, e))
}

/// Distinct `(name, key)` pairs in the report data dictionary.
pub fn list_variables_sql(path: &Path, limit: usize) -> ExtractResult<Vec<(String, String)>> {
    let conn = open_read_only(path)?;
    let mut stmt = conn
        .prepare("SELECT DISTINCT Name, KeyValue FROM ReportDataDictionary ORDER BY Name, KeyValue LIMIT ?1")
        .map_err(|e| ExtractError::sql(path, e))?;
    let rows = stmt
        .query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            ))
        })
        .map_err(|e| ExtractError::sql(path, e))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| ExtractError::sql(path, e))
}

/// Load a series from the SQL result store.
///
/// `variable` and `key` match by substring (SQL `LIKE`); the first dictionary
/// entry wins. Warm-up rows are excluded.
pub fn load_series_sql(path: &Path, variable: &str, key: Option<&str>) -> ExtractResult<TimeSeries> {
    let conn = open_read_only(path)?;
    let key_pattern = format!("%{}%", key.unwrap_or(""));
    let var_pattern = format!("%{variable}%");

    let entry = conn
        .query_row(
            "SELECT ReportDataDictionaryIndex, KeyValue, Name, Units
             FROM ReportDataDictionary
             WHERE Name LIKE ?1 AND COALESCE(KeyValue, '') LIKE ?2
             ORDER BY ReportDataDictionaryIndex
             LIMIT 1",
            params![var_pattern, key_pattern],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                ))
            },
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(ExtractError::sql(path, other)),
        })?;

    let Some((index, key_value, name, units)) = entry else {
        let available = list_variables_sql(path, 20)?
            .into_iter()
            .map(|(n, k)| format!("{n} [{k}]"))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(ExtractError::VariableNotFound {
            path: path.to_path_buf(),
            variable: variable.to_string(),
            key: key.unwrap_or("*").to_string(),
            available,
        });
    };

    let mut stmt = conn
        .prepare(
            "SELECT t.Month, t.Day, t.Hour, rd.Value
             FROM ReportData rd
             JOIN Time t ON rd.TimeIndex = t.TimeIndex
             WHERE rd.ReportDataDictionaryIndex = ?1
               AND (t.WarmupFlag IS NULL OR t.WarmupFlag = 0)
             ORDER BY t.Month, t.Day, t.Hour",
        )
        .map_err(|e| ExtractError::sql(path, e))?;
    let rows = stmt
        .query_map(params![index], |row| {
            let month = row.get::<_, Option<i64>>(0)?.unwrap_or(0);
            let day = row.get::<_, Option<i64>>(1)?.unwrap_or(0);
            let hour = row.get::<_, Option<i64>>(2)?.unwrap_or(0);
            let value = row.get::<_, f64>(3)?;
            Ok((Timestamp::new(month as u32, day as u32, hour as u32), value))
        })
        .map_err(|e| ExtractError::sql(path, e))?;
    let points = rows
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ExtractError::sql(path, e))?;

    if points.is_empty() {
        return Err(ExtractError::NoData {
            path: path.to_path_buf(),
            variable: name,
        });
    }

    Ok(TimeSeries {
        name,
        key: key_value,
        units,
        points,
        skipped_rows: 0,
        incomplete: false,
    })
}

/// Parse the simulator's `MM/DD  HH:MM:SS` date column.
pub fn parse_simulator_datetime(text: &str) -> Option<Timestamp> {
    let caps = DATETIME_RE.captures(text)?;
    Some(Timestamp::new(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    ))
}

/// Units from a header like `ZONE ONE:Zone Mean Air Temperature [C](Hourly)`.
pub fn units_from_header(header: &str) -> String {
    UNITS_RE
        .captures(header)
        .map(|c| c[1].to_string())
        .unwrap_or_default()
}

/// Index of `wanted` among `headers`: exact (case-insensitive) match first,
/// then substring.
pub(crate) fn match_column(headers: &[String], wanted: &str) -> Option<usize> {
    let wanted = wanted.trim().to_lowercase();
    headers
        .iter()
        .position(|h| h.to_lowercase() == wanted)
        .or_else(|| headers.iter().position(|h| h.to_lowercase().contains(&wanted)))
}

/// Load a series from a ReadVars CSV. Without `column`, the first value
/// column is used.
pub fn load_series_csv(path: &Path, column: Option<&str>) -> ExtractResult<TimeSeries> {
    let table = read_table(path)?;
    series_from_table(path, &table, column)
}

fn series_from_table(path: &Path, table: &CsvTable, column: Option<&str>) -> ExtractResult<TimeSeries> {
    let col = match column {
        Some(c) => match_column(&table.headers, c),
        None => (table.headers.len() > 1).then_some(1),
    };
    let Some(col) = col else {
        return Err(ExtractError::ColumnNotFound {
            path: path.to_path_buf(),
            column: column.unwrap_or("<first value column>").to_string(),
            available: table.headers.join(", "),
        });
    };

    let header = table.headers[col].clone();
    let mut series = TimeSeries {
        units: units_from_header(&header),
        name: header,
        ..TimeSeries::default()
    };

    let last = table.rows.len().saturating_sub(1);
    for (i, row) in table.rows.iter().enumerate() {
        let parsed = row.first().and_then(|d| parse_simulator_datetime(d)).and_then(|ts| {
            row.get(col)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .map(|v| (ts, v))
        });
        match parsed {
            Some(point) => series.points.push(point),
            None if i == last && table.truncated => series.incomplete = true,
            None => series.skipped_rows += 1,
        }
    }
    Ok(series)
}
