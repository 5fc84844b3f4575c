//! Comparison of variants, rebuilt from persisted markers only.

use std::cmp::Ordering;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use epcal_core::EnergySummary;
use serde::{Deserialize, Serialize};

use crate::error::{BatchError, BatchResult};
use crate::marker::{write_json_atomic, VariantMarker, VariantState};

pub const REPORT_FILE: &str = "comparison_results.json";

/// Scalar a comparison ranks on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareMetric {
    Total,
    Heating,
    Cooling,
    Eui,
    PeakHeating,
    PeakCooling,
}

impl CompareMetric {
    pub const ALL: [CompareMetric; 6] = [
        CompareMetric::Total,
        CompareMetric::Heating,
        CompareMetric::Cooling,
        CompareMetric::Eui,
        CompareMetric::PeakHeating,
        CompareMetric::PeakCooling,
    ];

    pub fn key(self) -> &'static str {
        match self {
            CompareMetric::Total => "total",
            CompareMetric::Heating => "heating",
            CompareMetric::Cooling => "cooling",
            CompareMetric::Eui => "eui",
            CompareMetric::PeakHeating => "peak_heating",
            CompareMetric::PeakCooling => "peak_cooling",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CompareMetric::Total => "Total Energy (GJ)",
            CompareMetric::Heating => "Heating Energy (GJ)",
            CompareMetric::Cooling => "Cooling Energy (GJ)",
            CompareMetric::Eui => "EUI (MJ/m2)",
            CompareMetric::PeakHeating => "Peak Heating Load (W)",
            CompareMetric::PeakCooling => "Peak Cooling Load (W)",
        }
    }

    pub fn value(self, s: &EnergySummary) -> Option<f64> {
        match self {
            CompareMetric::Total => s.total_energy_gj,
            CompareMetric::Heating => s.heating_gj,
            CompareMetric::Cooling => s.cooling_gj,
            CompareMetric::Eui => s.eui_mj_m2,
            CompareMetric::PeakHeating => s.peak_heating_w,
            CompareMetric::PeakCooling => s.peak_cooling_w,
        }
    }
}

impl FromStr for CompareMetric {
    type Err = BatchError;

    /// Exact key, or a fragment that identifies exactly one key
    /// (`"peak_cool"`, `"cool"` is ambiguous).
    fn from_str(s: &str) -> BatchResult<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        if let Some(m) = Self::ALL.iter().find(|m| m.key() == wanted) {
            return Ok(*m);
        }
        let partial: Vec<_> = Self::ALL
            .iter()
            .filter(|m| !wanted.is_empty() && m.key().contains(&wanted))
            .collect();
        match partial.as_slice() {
            [one] => Ok(**one),
            _ => Err(BatchError::InvalidSpec(format!(
                "unknown compare metric '{s}' (expected one of: {})",
                Self::ALL.map(|m| m.key()).join(", ")
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub variant_name: String,
    pub directory: PathBuf,
    pub state: VariantState,
    /// 1-based position among variants that have the metric.
    pub rank: Option<usize>,
    pub value: Option<f64>,
    pub duration_secs: Option<f64>,
    pub summary: Option<EnergySummary>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub results_dir: PathBuf,
    pub metric: CompareMetric,
    pub order: SortOrder,
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub completed: usize,
    /// Ranked rows first, then variants without the metric.
    pub rows: Vec<ReportRow>,
}

/// Build the comparison for every variant directory under `results_dir`
/// and persist it as [`REPORT_FILE`].
pub fn report(results_dir: &Path, metric: CompareMetric, order: SortOrder) -> BatchResult<ComparisonReport> {
    let entries = fs::read_dir(results_dir).map_err(|e| BatchError::io(results_dir, e))?;
    let mut dirs: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| BatchError::io(results_dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();

    let mut ranked = Vec::new();
    let mut unranked = Vec::new();
    for dir in dirs {
        let Some(marker) = VariantMarker::load(&dir)? else {
            continue;
        };
        let value = if marker.state == VariantState::Completed {
            marker.summary.as_ref().and_then(|s| metric.value(s))
        } else {
            None
        };
        let row = ReportRow {
            variant_name: marker.variant_name,
            directory: dir,
            state: marker.state,
            rank: None,
            value,
            duration_secs: marker.run_result.as_ref().map(|r| r.duration_secs),
            summary: marker.summary,
            error: marker.error,
        };
        if value.is_some() {
            ranked.push(row);
        } else {
            unranked.push(row);
        }
    }

    ranked.sort_by(|a, b| {
        let (x, y) = (a.value.unwrap_or(f64::NAN), b.value.unwrap_or(f64::NAN));
        let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
        match order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    });
    for (i, row) in ranked.iter_mut().enumerate() {
        row.rank = Some(i + 1);
    }

    let completed = ranked
        .iter()
        .chain(unranked.iter())
        .filter(|r| r.state == VariantState::Completed)
        .count();
    let mut rows = ranked;
    rows.extend(unranked);

    let report = ComparisonReport {
        results_dir: results_dir.to_path_buf(),
        metric,
        order,
        generated_at: Utc::now(),
        total: rows.len(),
        completed,
        rows,
    };
    write_json_atomic(&results_dir.join(REPORT_FILE), &report)?;
    Ok(report)
}

impl ComparisonReport {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Parametric Comparison: {} ===", self.metric.label());
        let _ = writeln!(out, "  Variants:   {}", self.total);
        let _ = writeln!(out, "  Completed:  {}/{}", self.completed, self.total);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "  {:>4}  {:<30} {:>12} {:>10} {:>10} {:>11}  {}",
            "Rank", "Variant", self.metric.key(), "Heat(GJ)", "Cool(GJ)", "EUI(MJ/m2)", "State"
        );
        let _ = writeln!(out, "  {}", "-".repeat(92));
        for row in &self.rows {
            let s = row.summary.as_ref();
            let _ = writeln!(
                out,
                "  {:>4}  {:<30} {:>12} {:>10} {:>10} {:>11}  {}",
                row.rank.map(|r| r.to_string()).unwrap_or_else(|| "-".into()),
                row.variant_name.chars().take(30).collect::<String>(),
                fmt(row.value),
                fmt(s.and_then(|s| s.heating_gj)),
                fmt(s.and_then(|s| s.cooling_gj)),
                fmt(s.and_then(|s| s.eui_mj_m2)),
                row.state
            );
        }
        out
    }
}

fn fmt(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.2}")).unwrap_or_else(|| "N/A".into())
}
