//! epcal - EnergyPlus simulation orchestrator CLI
//!
//! ## Commands
//!
//! - `doctor`: Check that the simulator and its schema can be found
//! - `run`: Run one simulation
//! - `errors`: Summarize the diagnostics log of a finished run
//! - `calibrate`: Score a run against metered data and keep a calibration ledger
//! - `parametric`: Run, resume and compare variant batches

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use epcal_core::{
    align, compute_metrics, diagnose, diagnostics_for_dir, load_measured_csv, load_simulated,
    AlignedSeries, Granularity, MetricSet, Overrides, ProcessRunner, ResolverEnv, RunSpan, RunSpec,
    TimeSeries, Toolchain, Verdict, DEFAULT_TIMEOUT_SECS,
};
use epcal_ledger::{CalibrationLedger, IterationDraft, ParameterChange, RecordOptions};
use epcal_parametric::{
    expand, report, BatchConfig, BatchEngine, CompareMetric, SortOrder, VariantSpec,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "epcal")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "EnergyPlus simulation orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Explicit simulator locations; each one disables discovery for its artifact.
#[derive(Args, Debug, Clone, Default)]
struct ToolchainArgs {
    /// Path to the energyplus executable
    #[arg(long)]
    energyplus_exe: Option<PathBuf>,

    /// Path to the Energy+.idd schema file
    #[arg(long)]
    idd: Option<PathBuf>,
}

impl ToolchainArgs {
    fn overrides(&self, model: Option<&Path>) -> Overrides {
        Overrides {
            executable: self.energyplus_exe.clone(),
            schema: self.idd.clone(),
            model: model.map(Path::to_path_buf),
            require_schema: false,
        }
    }
}

/// A simulated series paired with a metered one.
#[derive(Args, Debug, Clone)]
struct SeriesArgs {
    /// Simulated results: eplusout.sql or a ReadVars CSV
    #[arg(long)]
    simulated: PathBuf,

    /// Metered data CSV
    #[arg(long)]
    measured: PathBuf,

    /// Output variable name (required for SQL; selects the CSV column otherwise)
    #[arg(long)]
    variable: Option<String>,

    /// Column of the simulated CSV (overrides --variable for CSV input)
    #[arg(long)]
    sim_column: Option<String>,

    /// Column of the measured CSV (default: last numeric column)
    #[arg(long)]
    meas_column: Option<String>,

    /// Key value filter for SQL queries, e.g. a zone name
    #[arg(long)]
    key_value: Option<String>,

    /// Data interval, selects the compliance thresholds
    #[arg(long, default_value = "hourly")]
    granularity: Granularity,
}

#[derive(Subcommand)]
enum Commands {
    /// Check simulator discovery and print fix instructions
    Doctor {
        #[command(flatten)]
        toolchain: ToolchainArgs,

        /// Model whose directory may hold the schema
        #[arg(long)]
        model: Option<PathBuf>,
    },

    /// Run one simulation
    Run {
        /// Input model (.idf)
        #[arg(long)]
        model: PathBuf,

        /// Weather file (.epw)
        #[arg(short, long)]
        weather: Option<PathBuf>,

        /// Output directory
        #[arg(short = 'd', long, default_value = ".")]
        output_dir: PathBuf,

        /// Design-day only simulation
        #[arg(short = 'D', long)]
        design_day: bool,

        /// Annual simulation
        #[arg(short, long)]
        annual: bool,

        /// Expand HVACTemplate objects first
        #[arg(short = 'x', long)]
        expand_objects: bool,

        /// Produce ReadVars CSV output
        #[arg(short, long)]
        readvars: bool,

        /// Prefix for output file names
        #[arg(long)]
        output_prefix: Option<String>,

        /// Wall-clock limit in seconds
        #[arg(long, env = "EPCAL_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout: u64,

        #[command(flatten)]
        toolchain: ToolchainArgs,
    },

    /// Summarize the diagnostics log in an output directory
    Errors {
        /// Simulation output directory
        output_dir: PathBuf,

        /// Output file prefix
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Calibration statistics and ledger
    Calibrate {
        #[command(subcommand)]
        action: CalibrateAction,
    },

    /// Parametric variant batches
    Parametric {
        #[command(subcommand)]
        action: ParametricAction,
    },
}

#[derive(Subcommand)]
enum CalibrateAction {
    /// Compute fit statistics without recording anything
    Metrics {
        #[command(flatten)]
        series: SeriesArgs,
    },

    /// Score an iteration and append it to a run ledger
    Record {
        /// Calibration run directory
        #[arg(long)]
        run_dir: PathBuf,

        /// Run identifier (default: run directory name)
        #[arg(long)]
        run_id: Option<String>,

        /// Iteration number
        #[arg(long)]
        iteration: u32,

        /// Model used for this iteration; snapshotted into the run
        #[arg(long)]
        model: PathBuf,

        /// Weather file used for this iteration
        #[arg(long)]
        weather: Option<PathBuf>,

        #[command(flatten)]
        series: SeriesArgs,

        /// Changed parameters as JSON: {"name": {"from": .., "to": ..}} or {"name": value}
        #[arg(long, default_value = "{}")]
        changed_params: String,

        /// Read changed parameters from a JSON file instead
        #[arg(long)]
        changed_params_file: Option<PathBuf>,

        /// Model version tag used in the snapshot name
        #[arg(long)]
        tag: Option<String>,

        /// Free-form note
        #[arg(long, default_value = "")]
        note: String,

        /// Supersede an existing iteration
        #[arg(long)]
        force: bool,
    },

    /// Show the iteration trend of a run
    Summary {
        /// Calibration run directory
        #[arg(long)]
        run_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum ParametricAction {
    /// Run (or resume) every variant of a variants file
    Run {
        /// Base model (.idf)
        #[arg(long)]
        base: PathBuf,

        /// Variants JSON file
        #[arg(long)]
        variants: PathBuf,

        /// Results directory, one subdirectory per variant
        #[arg(short = 'd', long)]
        output_dir: PathBuf,

        /// Weather file (.epw)
        #[arg(short, long)]
        weather: Option<PathBuf>,

        /// Design-day only simulation
        #[arg(short = 'D', long)]
        design_day: bool,

        /// Annual simulation
        #[arg(short, long)]
        annual: bool,

        /// Expand HVACTemplate objects first
        #[arg(short = 'x', long)]
        expand_objects: bool,

        /// Variants simulated at once
        #[arg(long, env = "EPCAL_MAX_PARALLEL", default_value_t = 1)]
        max_parallel: usize,

        /// Wall-clock limit per variant in seconds
        #[arg(long, env = "EPCAL_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout: u64,

        /// Metric to rank by after the batch
        #[arg(long, default_value = "total")]
        compare: String,

        #[command(flatten)]
        toolchain: ToolchainArgs,
    },

    /// Rebuild the comparison from a results directory
    Report {
        /// Results directory of a batch
        #[arg(long)]
        results_dir: PathBuf,

        /// Metric to rank by
        #[arg(long, default_value = "total")]
        compare: String,

        /// Rank highest first
        #[arg(long)]
        descending: bool,
    },

    /// Print a starter variants file for one model object
    Template {
        /// Base model (.idf)
        #[arg(long)]
        base: PathBuf,

        /// Object type, e.g. WindowMaterial:SimpleGlazingSystem
        #[arg(long)]
        object_type: String,

        /// Object name (default: first object of the type)
        #[arg(long)]
        object_name: Option<String>,

        /// Comma-separated field indices, 0 = Name
        #[arg(long, default_value = "1")]
        fields: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    epcal_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Doctor { toolchain, model } => cmd_doctor(&toolchain, model.as_deref()),
        Commands::Run {
            model,
            weather,
            output_dir,
            design_day,
            annual,
            expand_objects,
            readvars,
            output_prefix,
            timeout,
            toolchain,
        } => {
            let mut spec = RunSpec::new(&model, &output_dir)
                .expand_objects(expand_objects)
                .generate_csv(readvars)
                .timeout_secs(timeout);
            if let Some(w) = weather {
                spec = spec.weather(w);
            }
            if design_day {
                spec = spec.design_day();
            }
            if annual {
                spec = spec.annual();
            }
            if let Some(prefix) = output_prefix {
                spec = spec.output_prefix(prefix);
            }
            cmd_run(&toolchain, &spec).await
        }
        Commands::Errors { output_dir, prefix } => cmd_errors(&output_dir, prefix.as_deref()),
        Commands::Calibrate { action } => match action {
            CalibrateAction::Metrics { series } => cmd_calibrate_metrics(&series),
            CalibrateAction::Record {
                run_dir,
                run_id,
                iteration,
                model,
                weather,
                series,
                changed_params,
                changed_params_file,
                tag,
                note,
                force,
            } => {
                let changed = match changed_params_file {
                    Some(path) => std::fs::read_to_string(&path).with_context(|| {
                        format!("Failed to read changed parameters: {:?}", path)
                    })?,
                    None => changed_params,
                };
                let record = RecordArgs {
                    run_id: run_id.as_deref(),
                    iteration,
                    model: &model,
                    weather: weather.as_deref(),
                    series: &series,
                    changed_params: &changed,
                    tag: tag.as_deref(),
                    note: &note,
                    force,
                };
                cmd_calibrate_record(&run_dir, record)
            }
            CalibrateAction::Summary { run_dir } => cmd_calibrate_summary(&run_dir),
        },
        Commands::Parametric { action } => match action {
            ParametricAction::Run {
                base,
                variants,
                output_dir,
                weather,
                design_day,
                annual,
                expand_objects,
                max_parallel,
                timeout,
                compare,
                toolchain,
            } => {
                let config = BatchConfig {
                    max_parallel,
                    weather,
                    design_day,
                    annual,
                    expand_objects,
                    timeout_secs: timeout,
                    output_prefix: None,
                };
                cmd_parametric_run(&toolchain, &base, &variants, &output_dir, &config, &compare)
                    .await
            }
            ParametricAction::Report {
                results_dir,
                compare,
                descending,
            } => cmd_parametric_report(&results_dir, &compare, descending),
            ParametricAction::Template {
                base,
                object_type,
                object_name,
                fields,
            } => cmd_parametric_template(&base, &object_type, object_name.as_deref(), &fields),
        },
    }
}

/// Print the discovery report; a failing verdict is a failing exit.
fn cmd_doctor(toolchain: &ToolchainArgs, model: Option<&Path>) -> Result<()> {
    let report = diagnose(&toolchain.overrides(model), &ResolverEnv::from_process());
    println!("{}", report.render());
    if report.verdict == Verdict::Fail {
        bail!("Simulator environment check failed");
    }
    Ok(())
}

async fn cmd_run(toolchain: &ToolchainArgs, spec: &RunSpec) -> Result<()> {
    let run_name = spec
        .model
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "run".to_string());
    let _span = RunSpan::enter(&run_name);

    let discovered = Toolchain::discover(
        toolchain.overrides(Some(&spec.model)),
        ResolverEnv::from_process(),
    )
    .context("Failed to locate the simulator (try `epcal doctor`)")?;
    let runner = ProcessRunner::new(discovered);
    let result = runner
        .run(spec)
        .await
        .with_context(|| format!("Failed to run {:?}", spec.model))?;

    println!("Status:     {}", result.status);
    match result.exit_code {
        Some(code) => println!("Exit code:  {}", code),
        None => println!("Exit code:  (killed)"),
    }
    println!("Duration:   {:.1}s", result.duration_secs);
    println!(
        "Diagnostics: {} fatal, {} severe, {} warnings{}",
        result.fatal_count,
        result.severe_count,
        result.warning_count,
        if result.log_incomplete {
            " (log incomplete)"
        } else {
            ""
        }
    );
    println!("Artifacts:  {}", result.artifacts_dir.display());

    if !result.is_success() {
        if !result.stderr_tail.is_empty() {
            eprintln!("{}", result.stderr_tail);
        }
        bail!("Simulation {}", result.status);
    }
    Ok(())
}

fn cmd_errors(output_dir: &Path, prefix: Option<&str>) -> Result<()> {
    let summary = diagnostics_for_dir(output_dir, prefix)
        .with_context(|| format!("Failed to read diagnostics in {:?}", output_dir))?;

    match &summary.log_path {
        Some(path) => println!("Log:      {}", path.display()),
        None => println!("Log:      (none found)"),
    }
    println!("Fatal:    {}", summary.fatal);
    println!("Severe:   {}", summary.severe);
    println!("Warnings: {}", summary.warning);
    if summary.completed_successfully {
        println!("Result:   completed successfully");
    } else if summary.terminated {
        println!("Result:   terminated");
    } else if summary.incomplete {
        println!("Result:   incomplete");
    }
    if !summary.lines.is_empty() {
        println!();
        for line in &summary.lines {
            println!("  {}", line);
        }
    }
    Ok(())
}

/// Load, align and score one simulated/measured pair.
fn score_series(args: &SeriesArgs) -> Result<(TimeSeries, AlignedSeries, MetricSet)> {
    let selector = args.sim_column.as_deref().or(args.variable.as_deref());
    let simulated = load_simulated(&args.simulated, selector, args.key_value.as_deref())
        .with_context(|| format!("Failed to load simulated series: {:?}", args.simulated))?;
    let measured = load_measured_csv(&args.measured, args.meas_column.as_deref())
        .with_context(|| format!("Failed to load measured series: {:?}", args.measured))?;

    let aligned = align(&simulated, &measured);
    if aligned.unmatched_simulated > 0 || aligned.unmatched_measured > 0 {
        warn!(
            matched = aligned.len(),
            unmatched_simulated = aligned.unmatched_simulated,
            unmatched_measured = aligned.unmatched_measured,
            "series only partially overlap"
        );
    }
    let metrics = compute_metrics(&aligned.simulated, &aligned.measured, args.granularity)
        .context("Failed to compute calibration metrics")?;
    Ok((simulated, aligned, metrics))
}

fn print_metrics(metrics: &MetricSet) {
    let t = metrics.granularity.thresholds();
    println!("Points:         {}", metrics.n_points);
    println!("RMSE:           {:.4}", metrics.rmse);
    println!(
        "CV(RMSE):       {:.4}%  (limit {}%)",
        metrics.cv_rmse, t.cv_rmse_max
    );
    println!("MBE:            {:.4}", metrics.mbe);
    println!(
        "NMBE:           {:.4}%  (limit ±{}%)",
        metrics.nmbe, t.nmbe_abs_max
    );
    match metrics.r2 {
        Some(r2) => println!("R²:             {:.4}", r2),
        None => println!("R²:             n/a"),
    }
    println!(
        "Max deviation:  {:.4} (point {})",
        metrics.max_deviation, metrics.max_deviation_index
    );
    println!(
        "ASHRAE 14 ({}): {}",
        metrics.granularity,
        if metrics.passes() { "PASS" } else { "FAIL" }
    );
}

fn cmd_calibrate_metrics(args: &SeriesArgs) -> Result<()> {
    let (_, _, metrics) = score_series(args)?;
    print_metrics(&metrics);
    Ok(())
}

/// Inputs of `calibrate record` after the changed-parameter source is read.
struct RecordArgs<'a> {
    run_id: Option<&'a str>,
    iteration: u32,
    model: &'a Path,
    weather: Option<&'a Path>,
    series: &'a SeriesArgs,
    changed_params: &'a str,
    tag: Option<&'a str>,
    note: &'a str,
    force: bool,
}

fn cmd_calibrate_record(run_dir: &Path, args: RecordArgs<'_>) -> Result<()> {
    let changed_parameters = parse_changed_params(args.changed_params)?;
    let ledger = CalibrationLedger::open(run_dir, args.run_id)
        .with_context(|| format!("Failed to open calibration run {:?}", run_dir))?;
    let _span = RunSpan::enter(ledger.run_id());

    let (simulated, _, metrics) = score_series(args.series)?;
    let variable = args
        .series
        .variable
        .clone()
        .unwrap_or_else(|| simulated.name.clone());

    let draft = IterationDraft {
        iteration: args.iteration,
        model_path: args.model.to_path_buf(),
        model_version_tag: args.tag.map(str::to_string),
        weather_path: args.weather.map(Path::to_path_buf),
        simulated_path: args.series.simulated.clone(),
        measured_path: args.series.measured.clone(),
        variable,
        key_filter: args.series.key_value.clone(),
        changed_parameters,
        metrics,
        note: args.note.to_string(),
    };
    let opts = RecordOptions { force: args.force };
    let record = ledger
        .record(draft, opts)
        .with_context(|| format!("Failed to record iteration {}", args.iteration))?;

    println!(
        "Recorded iteration {} of run '{}'",
        record.iteration, record.run_id
    );
    println!("Snapshot: {}", record.model_snapshot.display());
    print_metrics(&record.metrics);
    if let Some(prev) = record.delta_vs_previous.previous_iteration {
        println!(
            "Δ vs iteration {}: CV(RMSE) {:+.4}, NMBE {:+.4}",
            prev,
            record.delta_vs_previous.cv_rmse.unwrap_or(0.0),
            record.delta_vs_previous.nmbe.unwrap_or(0.0)
        );
    }
    Ok(())
}

fn cmd_calibrate_summary(run_dir: &Path) -> Result<()> {
    let ledger = CalibrationLedger::open(run_dir, None)
        .with_context(|| format!("Failed to open calibration run {:?}", run_dir))?;
    let summary = ledger.summary().context("Failed to read ledger")?;
    if summary.total_iterations == 0 {
        println!("No iterations recorded in {:?}", run_dir);
        return Ok(());
    }
    print!("{}", summary.render_text());
    Ok(())
}

/// Accepts `{"name": {"from": old, "to": new}}` or the shorthand
/// `{"name": new}`. Non-string values keep their JSON spelling.
fn parse_changed_params(text: &str) -> Result<BTreeMap<String, ParameterChange>> {
    let value: Value =
        serde_json::from_str(text).context("Changed parameters are not valid JSON")?;
    let Value::Object(map) = value else {
        bail!("Changed parameters must be a JSON object");
    };

    map.into_iter()
        .map(|(name, v)| -> Result<(String, ParameterChange)> {
            let change = match v {
                Value::Object(fields) => {
                    let to = fields
                        .get("to")
                        .map(scalar)
                        .ok_or_else(|| anyhow!("Parameter '{}' has no 'to' value", name))?;
                    let from = fields.get("from").filter(|v| !v.is_null()).map(scalar);
                    ParameterChange { from, to }
                }
                other => ParameterChange {
                    from: None,
                    to: scalar(&other),
                },
            };
            Ok((name, change))
        })
        .collect()
}

fn scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn cmd_parametric_run(
    toolchain: &ToolchainArgs,
    base: &Path,
    variants: &Path,
    output_dir: &Path,
    config: &BatchConfig,
    compare: &str,
) -> Result<()> {
    let metric: CompareMetric = compare.parse()?;
    let spec = VariantSpec::load(variants)
        .with_context(|| format!("Failed to load variants file {:?}", variants))?;
    let plans = expand(base, &spec).context("Failed to expand variants")?;
    info!(
        parameter = %spec.parameter_name,
        variants = plans.len(),
        "expanded variants"
    );

    let discovered = Toolchain::discover(
        toolchain.overrides(Some(base)),
        ResolverEnv::from_process(),
    )
    .context("Failed to locate the simulator (try `epcal doctor`)")?;
    let engine = BatchEngine::new(Arc::new(ProcessRunner::new(discovered)), output_dir);
    let outcome = engine.run(plans, config).await?;

    println!(
        "Batch {}: {} executed, {} resumed, {} failed ({:.1}s)",
        outcome.batch_id, outcome.executed, outcome.skipped, outcome.failed, outcome.duration_secs
    );
    for r in outcome.results.iter().filter(|r| !r.completed) {
        println!(
            "  {} {}: {}",
            r.plan.variant_name,
            r.state,
            r.error.as_deref().unwrap_or("simulation did not complete")
        );
    }
    println!();

    let comparison = report(output_dir, metric, SortOrder::Ascending)
        .with_context(|| format!("Failed to build comparison in {:?}", output_dir))?;
    print!("{}", comparison.render_text());

    if outcome.completed_count() == 0 && !outcome.results.is_empty() {
        bail!("No variant completed");
    }
    Ok(())
}

fn cmd_parametric_report(results_dir: &Path, compare: &str, descending: bool) -> Result<()> {
    let metric: CompareMetric = compare.parse()?;
    let order = if descending {
        SortOrder::Descending
    } else {
        SortOrder::Ascending
    };
    let comparison = report(results_dir, metric, order)
        .with_context(|| format!("Failed to build comparison in {:?}", results_dir))?;
    print!("{}", comparison.render_text());
    Ok(())
}

fn cmd_parametric_template(
    base: &Path,
    object_type: &str,
    object_name: Option<&str>,
    fields: &str,
) -> Result<()> {
    let indices = parse_field_indices(fields)?;
    let text =
        std::fs::read_to_string(base).with_context(|| format!("Failed to read model {:?}", base))?;
    let (spec, current) = VariantSpec::template(&text, object_type, object_name, &indices)?;

    for (index, value) in &current {
        eprintln!("field {}: current value '{}'", index, value);
    }
    println!("{}", serde_json::to_string_pretty(&spec)?);
    Ok(())
}

fn parse_field_indices(text: &str) -> Result<Vec<usize>> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .with_context(|| format!("Invalid field index '{}'", s))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "\
Version,23.2;
WindowMaterial:SimpleGlazingSystem,
    Window_Glazing,          !- Name
    2.7,                     !- U-Factor {W/m2-K}
    0.6;                     !- Solar Heat Gain Coefficient
";

    fn write_series(dir: &Path) -> SeriesArgs {
        let simulated = dir.join("eplusout.csv");
        let measured = dir.join("measured.csv");
        std::fs::write(
            &simulated,
            "Date/Time,ZONE ONE:Zone Mean Air Temperature [C](Hourly)\n\
             \x2001/01  01:00:00,20.5\n\
             \x2001/01  02:00:00,20.8\n\
             \x2001/01  03:00:00,22.3\n\
             \x2001/01  04:00:00,20.9\n",
        )
        .unwrap();
        std::fs::write(
            &measured,
            "Month,Day,Hour,Zone Temp\n1,1,1,20\n1,1,2,21\n1,1,3,22\n1,1,4,21\n",
        )
        .unwrap();
        SeriesArgs {
            simulated,
            measured,
            variable: Some("Zone Mean Air Temperature".into()),
            sim_column: None,
            meas_column: None,
            key_value: None,
            granularity: Granularity::Hourly,
        }
    }

    fn record_args<'a>(
        iteration: u32,
        model: &'a Path,
        series: &'a SeriesArgs,
        changed: &'a str,
    ) -> RecordArgs<'a> {
        RecordArgs {
            run_id: None,
            iteration,
            model,
            weather: None,
            series,
            changed_params: changed,
            tag: Some("glazing_v1"),
            note: "tuned glazing",
            force: false,
        }
    }

    #[test]
    fn test_cli_parses_nested_commands() {
        let cli = Cli::try_parse_from([
            "epcal",
            "calibrate",
            "record",
            "--run-dir",
            "runs/office",
            "--iteration",
            "3",
            "--model",
            "office.idf",
            "--simulated",
            "eplusout.sql",
            "--measured",
            "meter.csv",
            "--granularity",
            "monthly",
            "--force",
        ])
        .unwrap();
        match cli.command {
            Commands::Calibrate {
                action:
                    CalibrateAction::Record {
                        iteration,
                        series,
                        force,
                        changed_params,
                        ..
                    },
            } => {
                assert_eq!(iteration, 3);
                assert_eq!(series.granularity, Granularity::Monthly);
                assert!(force);
                assert_eq!(changed_params, "{}");
            }
            _ => panic!("parsed into the wrong command"),
        }

        assert!(Cli::try_parse_from(["epcal", "calibrate", "metrics", "--granularity", "daily"]).is_err());
    }

    #[test]
    fn test_changed_params_accepts_both_shapes() {
        let parsed = parse_changed_params(
            r#"{"wall_r": {"from": "2.1", "to": 2.8}, "infiltration_ach": 0.35}"#,
        )
        .unwrap();
        assert_eq!(parsed["wall_r"], ParameterChange::new(Some("2.1"), "2.8"));
        assert_eq!(parsed["infiltration_ach"], ParameterChange::new(None, "0.35"));

        assert!(parse_changed_params("[1, 2]").is_err());
        let err = parse_changed_params(r#"{"x": {"from": 1}}"#).unwrap_err();
        assert!(format!("{err:#}").contains("no 'to' value"));
    }

    #[test]
    fn test_field_indices() {
        assert_eq!(parse_field_indices("1, 2,,5").unwrap(), vec![1, 2, 5]);
        assert!(parse_field_indices("1,two").is_err());
    }

    #[test]
    fn test_record_then_summary() {
        let temp_dir = tempfile::tempdir().unwrap();
        let series = write_series(temp_dir.path());
        let model = temp_dir.path().join("office.idf");
        std::fs::write(&model, MODEL).unwrap();
        let run_dir = temp_dir.path().join("office-2026");

        cmd_calibrate_record(&run_dir, record_args(1, &model, &series, "{}")).unwrap();
        cmd_calibrate_record(
            &run_dir,
            record_args(2, &model, &series, r#"{"u_factor": {"from": "2.7", "to": "2.2"}}"#),
        )
        .unwrap();

        let ledger = CalibrationLedger::open(&run_dir, None).unwrap();
        let records = ledger.iterations().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].delta_vs_previous.previous_iteration, Some(1));
        assert_eq!(records[0].variable, "Zone Mean Air Temperature");
        assert_eq!(records[1].changed_parameters["u_factor"].to, "2.2");

        let err = cmd_calibrate_record(&run_dir, record_args(2, &model, &series, "{}")).unwrap_err();
        assert!(format!("{err:#}").contains("iteration 2"), "unexpected error: {err:#}");

        assert!(cmd_calibrate_summary(&run_dir).is_ok());
    }

    #[test]
    fn test_template_and_report_commands() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path().join("base.idf");
        std::fs::write(&base, MODEL).unwrap();

        cmd_parametric_template(&base, "WindowMaterial:SimpleGlazingSystem", None, "1,2").unwrap();
        let err = cmd_parametric_template(&base, "Material", None, "1").unwrap_err();
        assert!(format!("{err:#}").contains("no object of type 'Material'"));

        let results = temp_dir.path().join("results");
        std::fs::create_dir(&results).unwrap();
        cmd_parametric_report(&results, "eui", true).unwrap();
        assert!(cmd_parametric_report(&results, "lighting", false).is_err());
    }
}
