//! epcal parametric studies
//!
//! Expands a variants file into per-variant model patches, runs them
//! through a [`epcal_core::SimulationExecutor`] with persisted per-variant
//! state so that re-invocation resumes, and ranks the results.

pub mod engine;
pub mod error;
pub mod idf;
pub mod marker;
pub mod report;
pub mod spec;

pub use engine::{BatchConfig, BatchEngine, BatchOutcome, VariantResult, VARIANT_MODEL_FILE};
pub use error::{BatchError, BatchResult};
pub use idf::{apply_changes, parse_objects, IdfObject, PatchOutcome};
pub use marker::{VariantMarker, VariantState, MARKER_FILE};
pub use report::{report, CompareMetric, ComparisonReport, ReportRow, SortOrder, REPORT_FILE};
pub use spec::{expand, variant_dir_name, FieldChange, VariantDef, VariantPlan, VariantSpec};
