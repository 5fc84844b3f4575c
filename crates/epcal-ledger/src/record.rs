use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use epcal_core::{ContentDigest, MetricSet};
use serde::{Deserialize, Serialize};

/// One adjusted model parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterChange {
    pub from: Option<String>,
    pub to: String,
}

impl ParameterChange {
    pub fn new(from: Option<&str>, to: &str) -> Self {
        Self {
            from: from.map(str::to_string),
            to: to.to_string(),
        }
    }
}

/// Change in key statistics against the nearest preceding iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub previous_iteration: Option<u32>,
    /// Percentage points; negative is an improvement.
    pub cv_rmse: Option<f64>,
    pub nmbe: Option<f64>,
}

/// Caller-supplied content of a new iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationDraft {
    pub iteration: u32,
    /// Model file that produced the simulated series; snapshotted on record.
    pub model_path: PathBuf,
    /// Short label for the snapshot name, e.g. `wall_r_up`.
    pub model_version_tag: Option<String>,
    pub weather_path: Option<PathBuf>,
    pub simulated_path: PathBuf,
    pub measured_path: PathBuf,
    pub variable: String,
    pub key_filter: Option<String>,
    pub changed_parameters: BTreeMap<String, ParameterChange>,
    pub metrics: MetricSet,
    pub note: String,
}

/// A committed calibration iteration. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub run_id: String,
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    pub model_version_tag: String,
    pub model_path: PathBuf,
    /// Snapshot location relative to the run directory.
    pub model_snapshot: PathBuf,
    pub model_digest: ContentDigest,
    pub weather_path: Option<PathBuf>,
    pub simulated_path: PathBuf,
    pub measured_path: PathBuf,
    pub variable: String,
    pub key_filter: Option<String>,
    pub changed_parameters: BTreeMap<String, ParameterChange>,
    pub metrics: MetricSet,
    pub delta_vs_previous: MetricDelta,
    pub passes_compliance_check: bool,
    pub note: String,
}

/// Options for [`crate::CalibrationLedger::record`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordOptions {
    /// Supersede an existing iteration instead of failing.
    pub force: bool,
}

impl RecordOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}
