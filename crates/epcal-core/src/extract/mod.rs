//! Structured results from simulator artifacts.
//!
//! - [`diagnostics`]: severity counts and completeness from the `.err` log
//! - [`series`]: named time series from the SQL store or ReadVars CSV
//! - [`measured`]: metered data and timestamp alignment
//! - [`summary`]: building-level energy metrics from tabular reports
//!
//! Only the handful of fields the analytics need are read; the simulator's
//! formats are otherwise treated as opaque.

pub mod csv;
pub mod diagnostics;
pub mod error;
pub mod measured;
pub mod series;
pub mod summary;

pub use diagnostics::{
    diagnostics_for_dir, find_artifact, parse_diagnostics, summarize_log, DiagnosticSummary,
};
pub use error::{ExtractError, ExtractResult};
pub use measured::{align, load_measured_csv, parse_datetime, AlignedSeries};
pub use series::{
    list_variables_sql, load_series_csv, load_series_sql, TimeSeries, Timestamp,
};
pub use summary::{extract_energy_summary, EnergySummary, SummaryStatus};

use std::path::Path;

/// Load a simulated series from whichever artifact `path` names: `.sql`
/// stores are queried by variable/key, anything else is read as CSV with
/// `variable` selecting the column.
pub fn load_simulated(path: &Path, variable: Option<&str>, key: Option<&str>) -> ExtractResult<TimeSeries> {
    let is_sql = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("sql"))
        .unwrap_or(false);
    if is_sql {
        let variable = variable.ok_or_else(|| ExtractError::Malformed {
            path: path.to_path_buf(),
            reason: "a variable name is required to query the SQL result store".to_string(),
        })?;
        load_series_sql(path, variable, key)
    } else {
        load_series_csv(path, variable)
    }
}
