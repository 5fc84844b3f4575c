//! Scalar energy metrics from the tabular reports in the SQL result store.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::diagnostics::{diagnostics_for_dir, find_artifact};
use super::series::open_read_only;

const ANNUAL_REPORT: &str = "AnnualBuildingUtilityPerformanceSummary";
const SIZING_REPORT: &str = "HVACSizingSummary";

/// How far extraction got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Ok,
    /// The log shows a fatal termination; nothing was read.
    Fatal,
    /// No SQL result store in the output directory.
    NoSql,
    /// The store exists but could not be read.
    Error,
}

/// Building-level results used to compare parametric variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergySummary {
    pub total_energy_gj: Option<f64>,
    pub heating_gj: Option<f64>,
    pub cooling_gj: Option<f64>,
    pub eui_mj_m2: Option<f64>,
    pub area_m2: Option<f64>,
    pub peak_heating_w: Option<f64>,
    pub peak_cooling_w: Option<f64>,
    pub unmet_heating_hr: Option<f64>,
    pub unmet_cooling_hr: Option<f64>,
    pub status: SummaryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EnergySummary {
    fn empty(status: SummaryStatus) -> Self {
        Self {
            total_energy_gj: None,
            heating_gj: None,
            cooling_gj: None,
            eui_mj_m2: None,
            area_m2: None,
            peak_heating_w: None,
            peak_cooling_w: None,
            unmet_heating_hr: None,
            unmet_cooling_hr: None,
            status,
            error: None,
        }
    }
}

fn parse_value(text: Option<String>) -> Option<f64> {
    text.and_then(|t| t.trim().parse::<f64>().ok())
}

fn tabular_value(
    conn: &Connection,
    table: &str,
    row: &str,
    column: Option<&str>,
    units: Option<&str>,
) -> rusqlite::Result<Option<f64>> {
    conn.query_row(
        "SELECT Value FROM TabularDataWithStrings
         WHERE ReportName = ?1 AND TableName = ?2 AND RowName = ?3
           AND (?4 IS NULL OR ColumnName = ?4)
           AND (?5 IS NULL OR Units = ?5)
         LIMIT 1",
        params![ANNUAL_REPORT, table, row, column, units],
        |r| r.get::<_, Option<String>>(0),
    )
    .optional()
    .map(|v| parse_value(v.flatten()))
}

fn end_use_total(conn: &Connection, end_use: &str) -> rusqlite::Result<Option<f64>> {
    let elec = tabular_value(conn, "End Uses", end_use, Some("Electricity"), Some("GJ"))?;
    let gas = tabular_value(conn, "End Uses", end_use, Some("Natural Gas"), Some("GJ"))?;
    Ok(match (elec, gas) {
        (None, None) => None,
        (e, g) => Some(e.unwrap_or(0.0) + g.unwrap_or(0.0)),
    })
}

fn design_load_sum(conn: &Connection, table: &str) -> rusqlite::Result<Option<f64>> {
    let mut stmt = conn.prepare(
        "SELECT Value FROM TabularDataWithStrings
         WHERE ReportName = ?1 AND TableName = ?2
           AND ColumnName = 'Calculated Design Load' AND Units = 'W'",
    )?;
    let values = stmt
        .query_map(params![SIZING_REPORT, table], |r| r.get::<_, Option<String>>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let parsed: Vec<f64> = values.into_iter().filter_map(parse_value).collect();
    Ok((!parsed.is_empty()).then(|| parsed.iter().sum()))
}

fn read_summary(conn: &Connection) -> rusqlite::Result<EnergySummary> {
    let mut s = EnergySummary::empty(SummaryStatus::Ok);
    s.total_energy_gj = tabular_value(
        conn,
        "Site and Source Energy",
        "Total Site Energy",
        None,
        Some("GJ"),
    )?;
    s.eui_mj_m2 = tabular_value(
        conn,
        "Site and Source Energy",
        "Total Site Energy",
        None,
        Some("MJ/m2"),
    )?;
    s.heating_gj = end_use_total(conn, "Heating")?;
    s.cooling_gj = end_use_total(conn, "Cooling")?;
    s.area_m2 = tabular_value(
        conn,
        "Building Area",
        "Net Conditioned Building Area",
        None,
        None,
    )?;
    s.peak_heating_w = design_load_sum(conn, "Zone Sensible Heating")?;
    s.peak_cooling_w = design_load_sum(conn, "Zone Sensible Cooling")?;

    let mut stmt = conn.prepare(
        "SELECT RowName, Value FROM TabularDataWithStrings
         WHERE ReportName = ?1 AND TableName = 'Comfort and Setpoint Not Met Summary'",
    )?;
    let rows = stmt
        .query_map(params![ANNUAL_REPORT], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (row, value) in rows {
        if !row.contains("Occupied") {
            continue;
        }
        if row.contains("Heating") {
            s.unmet_heating_hr = parse_value(value);
        } else if row.contains("Cooling") {
            s.unmet_cooling_hr = parse_value(value);
        }
    }
    Ok(s)
}

/// Extract the energy summary of one finished run.
///
/// Never fails: problems are reported through [`EnergySummary::status`] so a
/// batch can keep going and still persist what it learned.
pub fn extract_energy_summary(dir: &Path, prefix: Option<&str>) -> EnergySummary {
    if let Ok(diag) = diagnostics_for_dir(dir, prefix) {
        if diag.fatal > 0 && diag.terminated {
            return EnergySummary::empty(SummaryStatus::Fatal);
        }
    }

    let Some(sql) = find_artifact(dir, prefix, ".sql") else {
        return EnergySummary::empty(SummaryStatus::NoSql);
    };

    let result = open_read_only(&sql)
        .map_err(|e| e.to_string())
        .and_then(|conn| read_summary(&conn).map_err(|e| e.to_string()));
    match result {
        Ok(summary) => summary,
        Err(e) => {
            warn!(path = %sql.display(), error = %e, "failed to read energy summary");
            EnergySummary {
                error: Some(e),
                ..EnergySummary::empty(SummaryStatus::Error)
            }
        }
    }
}
