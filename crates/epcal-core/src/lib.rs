//! epcal core library
//!
//! Simulator discovery, process execution, result extraction and
//! calibration statistics shared by the ledger, the parametric engine and
//! the `epcal` binary.

pub mod digest;
pub mod extract;
pub mod metrics;
pub mod obs;
pub mod resolver;
pub mod runner;
pub mod telemetry;

pub use digest::ContentDigest;

pub use extract::{
    align, diagnostics_for_dir, extract_energy_summary, find_artifact, load_measured_csv,
    load_series_csv, load_series_sql, load_simulated, parse_diagnostics, AlignedSeries,
    DiagnosticSummary, EnergySummary, ExtractError, ExtractResult, SummaryStatus, TimeSeries,
    Timestamp,
};

pub use metrics::{
    compute as compute_metrics, passes_guideline14, Granularity, MetricSet, MetricsError,
    MetricsResult, Thresholds,
};

pub use resolver::{
    diagnose, resolve, Artifact, DoctorReport, Outcome, Overrides, ResolutionError,
    ResolvedPaths, ResolverEnv, Toolchain, TraceEntry, Verdict,
};

pub use runner::{
    ProcessRunner, RunError, RunResult, RunSpec, RunStatus, RunnerResult, SimulationExecutor,
    DEFAULT_TIMEOUT_SECS,
};

pub use obs::{
    emit_iteration_forced, emit_iteration_recorded, emit_sim_finished, emit_sim_started,
    emit_sim_timeout, emit_variant_error, emit_variant_finished, emit_variant_skipped, RunSpan,
};
pub use telemetry::init_tracing;

/// epcal version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
