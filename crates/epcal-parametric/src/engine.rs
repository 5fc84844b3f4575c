//! Resumable batch execution of variant plans.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use epcal_core::{
    emit_variant_error, emit_variant_finished, emit_variant_skipped, extract_energy_summary,
    EnergySummary, RunResult, RunSpec, SimulationExecutor, DEFAULT_TIMEOUT_SECS,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{BatchError, BatchResult};
use crate::idf;
use crate::marker::{VariantMarker, VariantState};
use crate::spec::VariantPlan;

/// File name of the patched model inside each variant directory.
pub const VARIANT_MODEL_FILE: &str = "modified.idf";

/// Simulation settings shared by every variant in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Variants simulated at once; 1 runs them sequentially in plan order.
    pub max_parallel: usize,
    pub weather: Option<PathBuf>,
    pub design_day: bool,
    pub annual: bool,
    pub expand_objects: bool,
    pub timeout_secs: u64,
    pub output_prefix: Option<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_parallel: 1,
            weather: None,
            design_day: false,
            annual: false,
            expand_objects: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            output_prefix: None,
        }
    }
}

impl BatchConfig {
    fn run_spec(&self, model: PathBuf, output_dir: PathBuf) -> RunSpec {
        let mut spec = RunSpec::new(model, output_dir)
            .expand_objects(self.expand_objects)
            .timeout_secs(self.timeout_secs);
        if let Some(w) = &self.weather {
            spec = spec.weather(w.clone());
        }
        if self.design_day {
            spec = spec.design_day();
        }
        if self.annual {
            spec = spec.annual();
        }
        if let Some(prefix) = &self.output_prefix {
            spec = spec.output_prefix(prefix.clone());
        }
        spec
    }
}

/// Outcome of one variant within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantResult {
    pub plan: VariantPlan,
    pub run_result: Option<RunResult>,
    pub summary: Option<EnergySummary>,
    pub completed: bool,
    pub state: VariantState,
    /// Result was taken from a previous invocation.
    pub skipped: bool,
    pub error: Option<String>,
}

impl VariantResult {
    fn from_marker(plan: VariantPlan, marker: VariantMarker, skipped: bool) -> Self {
        Self {
            completed: marker.state == VariantState::Completed,
            state: marker.state,
            run_result: marker.run_result,
            summary: marker.summary,
            error: marker.error,
            skipped,
            plan,
        }
    }

    fn failed(plan: VariantPlan, error: String) -> Self {
        Self {
            plan,
            run_result: None,
            summary: None,
            completed: false,
            state: VariantState::Failed,
            skipped: false,
            error: Some(error),
        }
    }
}

/// Results of a batch in plan order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub batch_id: Uuid,
    pub results: Vec<VariantResult>,
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duration_secs: f64,
}

impl BatchOutcome {
    pub fn completed_count(&self) -> usize {
        self.results.iter().filter(|r| r.completed).count()
    }
}

/// Runs variant plans through a [`SimulationExecutor`], one subdirectory of
/// `results_dir` per variant.
pub struct BatchEngine {
    executor: Arc<dyn SimulationExecutor>,
    results_dir: PathBuf,
}

impl BatchEngine {
    pub fn new(executor: Arc<dyn SimulationExecutor>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            results_dir: results_dir.into(),
        }
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Execute every plan that is not already completed with a matching
    /// fingerprint.
    ///
    /// Variant failures never abort the batch; only a results directory
    /// that cannot be created is an error.
    #[instrument(skip_all, fields(results_dir = %self.results_dir.display(), plans = plans.len()))]
    pub async fn run(&self, plans: Vec<VariantPlan>, config: &BatchConfig) -> BatchResult<BatchOutcome> {
        let start = Instant::now();
        let batch_id = Uuid::new_v4();
        fs::create_dir_all(&self.results_dir).map_err(|e| BatchError::io(&self.results_dir, e))?;
        info!(batch_id = %batch_id, "starting parametric batch");

        let mut slots: Vec<Option<VariantResult>> = Vec::with_capacity(plans.len());
        let mut queued: Vec<(usize, VariantPlan)> = Vec::new();
        for (idx, plan) in plans.into_iter().enumerate() {
            let dir = self.results_dir.join(&plan.output_subdirectory);
            match VariantMarker::load(&dir) {
                Ok(Some(marker))
                    if marker.state == VariantState::Completed
                        && marker.fingerprint == plan.fingerprint =>
                {
                    emit_variant_skipped(&plan.variant_name);
                    slots.push(Some(VariantResult::from_marker(plan, marker, true)));
                    continue;
                }
                Ok(Some(marker)) if marker.state == VariantState::Completed => {
                    warn!(
                        variant = %plan.variant_name,
                        "completed marker was produced by different inputs; re-running"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(variant = %plan.variant_name, error = %e, "cannot read variant marker"),
            }

            let pending = VariantMarker::pending(&plan.variant_name, plan.fingerprint.clone());
            if let Err(e) = pending.store(&dir) {
                warn!(variant = %plan.variant_name, error = %e, "cannot write pending marker");
            }
            slots.push(None);
            queued.push((idx, plan));
        }

        let executed = queued.len();
        if config.max_parallel <= 1 {
            for (idx, plan) in queued {
                let result = run_variant(self.executor.as_ref(), &self.results_dir, plan, config).await;
                slots[idx] = Some(result);
            }
        } else {
            let sem = Arc::new(Semaphore::new(config.max_parallel));
            let mut tasks = Vec::with_capacity(queued.len());
            for (idx, plan) in queued {
                let sem = Arc::clone(&sem);
                let executor = Arc::clone(&self.executor);
                let results_dir = self.results_dir.clone();
                let config = config.clone();
                let fallback = plan.clone();
                let task = tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await.ok();
                    run_variant(executor.as_ref(), &results_dir, plan, &config).await
                });
                tasks.push((idx, fallback, task));
            }
            for (idx, plan, task) in tasks {
                let result = match task.await {
                    Ok(r) => r,
                    Err(e) => {
                        emit_variant_error(&plan.variant_name, &e);
                        VariantResult::failed(plan, format!("variant task aborted: {e}"))
                    }
                };
                slots[idx] = Some(result);
            }
        }

        let results: Vec<VariantResult> = slots.into_iter().flatten().collect();
        let skipped = results.iter().filter(|r| r.skipped).count();
        let failed = results
            .iter()
            .filter(|r| !r.skipped && r.state == VariantState::Failed)
            .count();
        let duration_secs = start.elapsed().as_secs_f64();
        info!(
            batch_id = %batch_id,
            executed,
            skipped,
            failed,
            duration_secs,
            "parametric batch finished"
        );

        Ok(BatchOutcome {
            batch_id,
            results,
            executed,
            skipped,
            failed,
            duration_secs,
        })
    }
}

/// Drive one variant to `Completed` or `Failed`, persisting each step.
async fn run_variant(
    executor: &dyn SimulationExecutor,
    results_dir: &Path,
    plan: VariantPlan,
    config: &BatchConfig,
) -> VariantResult {
    let dir = results_dir.join(&plan.output_subdirectory);
    let start = Instant::now();

    let mut marker = VariantMarker::pending(&plan.variant_name, plan.fingerprint.clone());
    if let Err(e) = marker.advance(VariantState::Running).and_then(|_| marker.store(&dir)) {
        emit_variant_error(&plan.variant_name, &e);
        return VariantResult::failed(plan, e.to_string());
    }

    let recorded = match simulate(executor, &dir, &plan, config).await {
        Ok((run, summary)) => marker.finish(run, summary),
        Err(e) => {
            emit_variant_error(&plan.variant_name, &e);
            marker.fail(e.to_string())
        }
    };
    if let Err(e) = recorded {
        emit_variant_error(&plan.variant_name, &e);
        return VariantResult::failed(plan, format!("cannot record outcome: {e}"));
    }

    if let Err(e) = marker.store(&dir) {
        emit_variant_error(&plan.variant_name, &e);
        return VariantResult::failed(plan, format!("cannot persist final state: {e}"));
    }
    emit_variant_finished(
        &plan.variant_name,
        marker.state == VariantState::Completed,
        start.elapsed().as_secs_f64(),
    );
    VariantResult::from_marker(plan, marker, false)
}

async fn simulate(
    executor: &dyn SimulationExecutor,
    dir: &Path,
    plan: &VariantPlan,
    config: &BatchConfig,
) -> BatchResult<(RunResult, Option<EnergySummary>)> {
    let base = fs::read_to_string(&plan.base_model).map_err(|e| BatchError::io(&plan.base_model, e))?;
    let patch = idf::apply_changes(&base, &plan.parameter_changes);
    for change in &patch.unmatched {
        warn!(
            variant = %plan.variant_name,
            object_type = %change.object_type,
            object_name = %change.object_name,
            field_index = change.field_index,
            "change matched no object field"
        );
    }

    let model = dir.join(VARIANT_MODEL_FILE);
    fs::write(&model, patch.text).map_err(|e| BatchError::io(&model, e))?;

    let spec = config.run_spec(model, dir.to_path_buf());
    let run = executor
        .execute(&spec)
        .await
        .map_err(|source| BatchError::Simulation {
            variant: plan.variant_name.clone(),
            source,
        })?;

    let summary = if run.is_success() {
        Some(extract_energy_summary(dir, config.output_prefix.as_deref()))
    } else {
        None
    };
    Ok((run, summary))
}
