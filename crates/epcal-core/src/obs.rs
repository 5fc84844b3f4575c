//! Structured observability hooks for simulation lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `RunSpan` RAII guard
//! - Emission functions for simulator start/finish/timeout, ledger commits
//!   and batch variant transitions
//!
//! Events are emitted at `info!` level unless noted otherwise; filter with
//! `RUST_LOG` and switch to JSON lines with the CLI's `--json` flag.

use std::path::Path;

use tracing::{info, warn};

/// RAII guard that enters a run-scoped tracing span for the duration of a
/// calibration run or parametric batch.
///
/// ```ignore
/// let _span = RunSpan::enter("calib-office-2026");
/// // every event emitted below is tagged with run_id = "calib-office-2026"
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the run_id.
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("epcal.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: simulator process spawned.
pub fn emit_sim_started(model: &Path, output_dir: &Path, timeout_secs: u64) {
    info!(
        event = "sim.started",
        model = %model.display(),
        output_dir = %output_dir.display(),
        timeout_secs = timeout_secs,
    );
}

/// Emit event: simulator process exited.
pub fn emit_sim_finished(
    model: &Path,
    exit_code: Option<i32>,
    duration_secs: f64,
    fatal: usize,
    severe: usize,
    warnings: usize,
) {
    info!(
        event = "sim.finished",
        model = %model.display(),
        exit_code = ?exit_code,
        duration_secs = duration_secs,
        fatal = fatal,
        severe = severe,
        warnings = warnings,
    );
}

/// Emit event: simulator killed after exceeding its wall-clock limit (warning level).
pub fn emit_sim_timeout(model: &Path, limit_secs: u64) {
    warn!(event = "sim.timeout", model = %model.display(), limit_secs = limit_secs);
}

/// Emit event: a calibration iteration was committed to the ledger.
pub fn emit_iteration_recorded(run_id: &str, iteration: u32, cv_rmse: f64, nmbe: f64, passed: bool) {
    info!(
        event = "ledger.recorded",
        run_id = %run_id,
        iteration = iteration,
        cv_rmse = cv_rmse,
        nmbe = nmbe,
        pass_ashrae14 = passed,
    );
}

/// Emit event: an existing iteration is being overwritten (warning level).
pub fn emit_iteration_forced(run_id: &str, iteration: u32) {
    warn!(
        event = "ledger.force_overwrite",
        run_id = %run_id,
        iteration = iteration,
        "overwriting a recorded calibration iteration"
    );
}

/// Emit event: a completed variant was skipped on resume.
pub fn emit_variant_skipped(variant: &str) {
    info!(event = "batch.variant_skipped", variant = %variant);
}

/// Emit event: a variant finished executing.
pub fn emit_variant_finished(variant: &str, success: bool, duration_secs: f64) {
    info!(
        event = "batch.variant_finished",
        variant = %variant,
        success = success,
        duration_secs = duration_secs,
    );
}

/// Emit event: a variant failed to run at all (warning level).
pub fn emit_variant_error(variant: &str, error: &dyn std::fmt::Display) {
    warn!(event = "batch.variant_error", variant = %variant, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("test-run-id");
        emit_variant_skipped("baseline");
    }
}
