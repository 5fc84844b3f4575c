//! Simulator process execution.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::{RunError, RunnerResult};
use super::result::{tail, RunResult, RunStatus};
use super::spec::{model_uses_templates, RunSpec};
use crate::extract::diagnostics_for_dir;
use crate::obs;
use crate::resolver::{resolve, ResolvedPaths, ResolverEnv, Toolchain};

/// Characters of stdout/stderr kept in a [`RunResult`].
pub const OUTPUT_TAIL_CHARS: usize = 4000;

/// Grace period for output pipes to close after the child exits or is killed.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Bytes read from one output pipe so far.
type Captured = Arc<Mutex<Vec<u8>>>;

/// Anything that can turn a [`RunSpec`] into a [`RunResult`].
///
/// The production implementation is [`ProcessRunner`]; batch code takes this
/// trait so tests can substitute a scripted simulator.
#[async_trait]
pub trait SimulationExecutor: Send + Sync {
    async fn execute(&self, spec: &RunSpec) -> RunnerResult<RunResult>;
}

/// Runs the real simulator binary.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    toolchain: Toolchain,
}

impl ProcessRunner {
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    fn paths_for(&self, spec: &RunSpec) -> RunnerResult<ResolvedPaths> {
        match &spec.overrides {
            Some(o) => Ok(resolve(&o.into(), &ResolverEnv::from_process())?),
            None => Ok(self.toolchain.paths().clone()),
        }
    }

    /// Validate, spawn and await one simulation.
    ///
    /// Guarantees:
    /// - Validation failures return before anything is spawned.
    /// - A timeout kills the simulator's whole process group and yields
    ///   `RunStatus::TimedOut` with the output captured so far.
    /// - Diagnostic counts come from the run's `.err` log.
    pub async fn run(&self, spec: &RunSpec) -> RunnerResult<RunResult> {
        let weather = spec.validate()?.map(absolute).transpose()?;
        let paths = self.paths_for(spec)?;

        if !spec.expand_objects {
            if let Ok(text) = std::fs::read_to_string(&spec.model) {
                if model_uses_templates(&text) {
                    warn!(
                        model = %spec.model.display(),
                        "model contains HVACTemplate objects but expand_objects is off"
                    );
                }
            }
        }

        std::fs::create_dir_all(&spec.output_dir).map_err(|source| RunError::Environment {
            action: "cannot create output directory",
            path: spec.output_dir.clone(),
            source,
        })?;
        let output_dir = absolute(&spec.output_dir)?;
        let resolved_spec = RunSpec {
            model: absolute(&spec.model)?,
            output_dir: output_dir.clone(),
            ..spec.clone()
        };
        let args = resolved_spec.command_args(paths.schema.as_deref(), weather.as_deref());
        debug!(executable = %paths.executable.display(), ?args, "spawning simulator");

        obs::emit_sim_started(&spec.model, &output_dir, spec.timeout_secs);
        let start = Instant::now();

        let mut command = Command::new(&paths.executable);
        command
            .args(&args)
            .current_dir(&output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command.spawn().map_err(|source| RunError::Environment {
            action: "failed to launch simulator",
            path: paths.executable.clone(),
            source,
        })?;

        let stdout_buf = Captured::default();
        let stderr_buf = Captured::default();
        let stdout = tokio::spawn(drain(child.stdout.take(), Arc::clone(&stdout_buf)));
        let stderr = tokio::spawn(drain(child.stderr.take(), Arc::clone(&stderr_buf)));

        let limit = Duration::from_secs(spec.timeout_secs);
        let (mut status, exit_code) = match tokio::time::timeout(limit, child.wait()).await {
            Ok(waited) => {
                let exit = waited?;
                let status = if exit.success() {
                    RunStatus::Completed
                } else {
                    RunStatus::Failed
                };
                (status, exit.code())
            }
            Err(_) => {
                kill_process_tree(&mut child).await;
                obs::emit_sim_timeout(&spec.model, spec.timeout_secs);
                (RunStatus::TimedOut, None)
            }
        };
        let duration_secs = start.elapsed().as_secs_f64();

        let stdout_tail = collect(stdout, &stdout_buf).await;
        let stderr_tail = collect(stderr, &stderr_buf).await;

        let diagnostics = diagnostics_for_dir(&output_dir, spec.output_prefix.as_deref())
            .unwrap_or_else(|e| {
                warn!(error = %e, "could not read simulator log");
                crate::extract::DiagnosticSummary::missing()
            });
        if status == RunStatus::Completed && diagnostics.fatal > 0 {
            status = RunStatus::Failed;
        }

        obs::emit_sim_finished(
            &spec.model,
            exit_code,
            duration_secs,
            diagnostics.fatal,
            diagnostics.severe,
            diagnostics.warning,
        );

        Ok(RunResult {
            status,
            exit_code,
            duration_secs,
            stdout_tail,
            stderr_tail,
            artifacts_dir: output_dir,
            fatal_count: diagnostics.fatal,
            severe_count: diagnostics.severe,
            warning_count: diagnostics.warning,
            log_incomplete: diagnostics.incomplete,
        })
    }
}

#[async_trait]
impl SimulationExecutor for ProcessRunner {
    async fn execute(&self, spec: &RunSpec) -> RunnerResult<RunResult> {
        self.run(spec).await
    }
}

fn absolute(path: &Path) -> RunnerResult<PathBuf> {
    std::path::absolute(path).map_err(|source| RunError::Environment {
        action: "cannot resolve path",
        path: path.to_path_buf(),
        source,
    })
}

/// Kill the child and everything it spawned.
///
/// The child leads its own process group on Unix, so one signal reaches
/// grandchildren that would otherwise keep the output pipes open.
async fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|p| libc::pid_t::try_from(p).ok()) {
        // SAFETY: killpg takes no pointers; a stale group id fails with ESRCH.
        let rc = unsafe { libc::killpg(pid, libc::SIGKILL) };
        if rc != 0 {
            let e = std::io::Error::last_os_error();
            warn!(pid, error = %e, "failed to signal simulator process group");
        }
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill timed-out simulator");
    }
}

/// Copy a pipe into `sink` until EOF. Bytes stay in `sink` if the task is
/// aborted part way.
async fn drain<R: AsyncRead + Unpin>(reader: Option<R>, sink: Captured) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .extend_from_slice(&chunk[..n]),
        }
    }
}

/// Wait briefly for the pipe to close, then keep whatever was read.
async fn collect(mut handle: JoinHandle<()>, sink: &Captured) -> String {
    if tokio::time::timeout(PIPE_DRAIN_GRACE, &mut handle).await.is_err() {
        handle.abort();
        let _ = handle.await;
    }
    let bytes = sink
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    tail(&String::from_utf8_lossy(&bytes), OUTPUT_TAIL_CHARS)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::resolver::Overrides;
    use std::os::unix::fs::PermissionsExt;

    /// Write an executable shell script standing in for the simulator.
    fn fake_simulator(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("energyplus");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn runner_for(exe: PathBuf) -> ProcessRunner {
        let toolchain = Toolchain::discover(
            Overrides {
                executable: Some(exe),
                ..Overrides::default()
            },
            ResolverEnv::empty(),
        )
        .unwrap();
        ProcessRunner::new(toolchain)
    }

    fn model(dir: &Path) -> PathBuf {
        let p = dir.join("office.idf");
        std::fs::write(&p, "Version,23.2;\n").unwrap();
        p
    }

    #[tokio::test]
    async fn successful_run_reads_err_counts() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_simulator(
            dir.path(),
            r#"echo "simulating $*"
printf '   ** Warning ** one\n   ************* EnergyPlus Completed Successfully-- 1 Warning\n' > eplusout.err
exit 0"#,
        );
        let spec = RunSpec::new(model(dir.path()), dir.path().join("out")).design_day();

        let result = runner_for(exe).run(&spec).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert!(result.is_success());
        assert_eq!(result.warning_count, 1);
        assert!(!result.log_incomplete);
        assert!(result.stdout_tail.contains("--design-day"));
        assert!(result.artifacts_dir.join("eplusout.err").is_file());
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failed_result_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_simulator(dir.path(), "echo boom >&2\nexit 3");
        let spec = RunSpec::new(model(dir.path()), dir.path().join("out")).design_day();

        let result = runner_for(exe).run(&spec).await.unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.exit_code, Some(3));
        assert!(result.stderr_tail.contains("boom"));
        assert!(result.log_incomplete);
    }

    #[tokio::test]
    async fn fatal_log_marks_clean_exit_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_simulator(
            dir.path(),
            r#"printf '   **  Fatal  ** bad input\n   ************* EnergyPlus Terminated--Fatal Error Detected.\n' > eplusout.err
exit 0"#,
        );
        let spec = RunSpec::new(model(dir.path()), dir.path().join("out")).design_day();

        let result = runner_for(exe).run(&spec).await.unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.fatal_count, 1);
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn timeout_kills_and_reports_status() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_simulator(dir.path(), "echo started\nexec sleep 30");
        let spec = RunSpec::new(model(dir.path()), dir.path().join("out"))
            .design_day()
            .timeout_secs(1);

        let started = Instant::now();
        let result = runner_for(exe).run(&spec).await.unwrap();
        assert_eq!(result.status, RunStatus::TimedOut);
        assert_eq!(result.exit_code, None);
        assert!(result.stdout_tail.contains("started"));
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn timeout_kills_grandchildren_and_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let late = dir.path().join("late_write");
        let exe = fake_simulator(
            dir.path(),
            &format!(
                "echo started\n(sleep 3; touch {}) &\nsleep 30\necho done",
                late.display()
            ),
        );
        let spec = RunSpec::new(model(dir.path()), dir.path().join("out"))
            .design_day()
            .timeout_secs(1);

        let started = Instant::now();
        let result = runner_for(exe).run(&spec).await.unwrap();
        assert_eq!(result.status, RunStatus::TimedOut);
        assert!(result.stdout_tail.contains("started"), "tail: {:?}", result.stdout_tail);
        assert!(!result.stdout_tail.contains("done"));
        assert!(started.elapsed() < PIPE_DRAIN_GRACE);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!late.exists(), "background process outlived the timeout");
    }

    #[tokio::test]
    async fn validation_failure_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let exe = fake_simulator(dir.path(), &format!("touch {}", marker.display()));
        let spec = RunSpec::new(model(dir.path()), dir.path().join("out"));

        let err = runner_for(exe).run(&spec).await.unwrap_err();
        assert!(matches!(err, RunError::Validation(_)));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn unlaunchable_executable_is_an_environment_error() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("energyplus");
        std::fs::write(&exe, "not executable").unwrap();
        let spec = RunSpec::new(model(dir.path()), dir.path().join("out")).design_day();

        let err = runner_for(exe.clone()).run(&spec).await.unwrap_err();
        match err {
            RunError::Environment { path, .. } => assert_eq!(path, exe),
            other => panic!("expected Environment, got {other:?}"),
        }
    }
}
