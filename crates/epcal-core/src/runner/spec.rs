//! Simulation request and command-line assembly.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::{RunError, RunnerResult};
use crate::resolver::Overrides;

/// Default wall-clock limit for one simulation.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// One simulation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    pub model: PathBuf,
    /// Required unless `design_day_only`.
    pub weather: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub output_prefix: Option<String>,
    pub design_day_only: bool,
    pub annual: bool,
    /// Must be set when the model uses template objects.
    pub expand_objects: bool,
    /// Ask the simulator to post-process results into CSV.
    pub generate_csv: bool,
    pub timeout_secs: u64,
    /// Per-run discovery overrides; `None` uses the runner's toolchain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<OverridePaths>,
}

/// Serializable subset of [`Overrides`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverridePaths {
    pub executable: Option<PathBuf>,
    pub schema: Option<PathBuf>,
}

impl From<&OverridePaths> for Overrides {
    fn from(p: &OverridePaths) -> Self {
        Overrides {
            executable: p.executable.clone(),
            schema: p.schema.clone(),
            ..Overrides::default()
        }
    }
}

impl RunSpec {
    /// Annual or weather-driven run with default settings.
    pub fn new(model: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            weather: None,
            output_dir: output_dir.into(),
            output_prefix: None,
            design_day_only: false,
            annual: false,
            expand_objects: false,
            generate_csv: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            overrides: None,
        }
    }

    pub fn weather(mut self, epw: impl Into<PathBuf>) -> Self {
        self.weather = Some(epw.into());
        self
    }

    pub fn design_day(mut self) -> Self {
        self.design_day_only = true;
        self
    }

    pub fn annual(mut self) -> Self {
        self.annual = true;
        self
    }

    pub fn expand_objects(mut self, on: bool) -> Self {
        self.expand_objects = on;
        self
    }

    pub fn generate_csv(mut self, on: bool) -> Self {
        self.generate_csv = on;
        self
    }

    pub fn output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_prefix = Some(prefix.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Check the request before anything is spawned.
    ///
    /// Returns the weather file that will actually be passed; with
    /// design-day runs any supplied weather file is ignored.
    pub fn validate(&self) -> RunnerResult<Option<&Path>> {
        if !self.model.is_file() {
            return Err(RunError::Validation(format!(
                "model file not found: {}",
                self.model.display()
            )));
        }
        if self.timeout_secs == 0 {
            return Err(RunError::Validation(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(prefix) = &self.output_prefix {
            if prefix.is_empty() || prefix.contains(['/', '\\']) {
                return Err(RunError::Validation(format!(
                    "output prefix must be a plain file stem, got '{prefix}'"
                )));
            }
        }

        if self.design_day_only {
            if let Some(w) = &self.weather {
                warn!(
                    weather = %w.display(),
                    "design-day run: weather file ignored"
                );
            }
            return Ok(None);
        }

        match &self.weather {
            None => Err(RunError::Validation(format!(
                "weather file required for a non-design-day run of {}",
                self.model.display()
            ))),
            Some(w) if !w.is_file() => Err(RunError::Validation(format!(
                "weather file not found: {}",
                w.display()
            ))),
            Some(w) => Ok(Some(w.as_path())),
        }
    }

    /// Simulator arguments, model last. Paths must already be absolute
    /// because the process runs with the output directory as its cwd.
    pub fn command_args(&self, schema: Option<&Path>, weather: Option<&Path>) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(idd) = schema {
            args.push("--idd".into());
            args.push(idd.into());
        }
        args.push("--output-directory".into());
        args.push(self.output_dir.clone().into());
        if let Some(prefix) = &self.output_prefix {
            args.push("--output-prefix".into());
            args.push(prefix.into());
        }
        if let Some(epw) = weather {
            args.push("--weather".into());
            args.push(epw.into());
        }
        if self.design_day_only {
            args.push("--design-day".into());
        }
        if self.annual {
            args.push("--annual".into());
        }
        if self.expand_objects {
            args.push("--expandobjects".into());
        }
        if self.generate_csv {
            args.push("--readvars".into());
        }
        args.push(self.model.clone().into());
        args
    }
}

/// Whether a model contains template objects that need expansion.
pub fn model_uses_templates(text: &str) -> bool {
    text.lines()
        .map(|l| l.split('!').next().unwrap_or("").trim_start())
        .any(|l| l.to_ascii_lowercase().starts_with("hvactemplate:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_in(dir: &Path) -> PathBuf {
        let p = dir.join("office.idf");
        std::fs::write(&p, "Version,23.2;\n").unwrap();
        p
    }

    #[test]
    fn weather_required_for_non_design_day() {
        let dir = tempfile::tempdir().unwrap();
        let spec = RunSpec::new(model_in(dir.path()), dir.path().join("out"));
        let err = spec.validate().unwrap_err();
        assert!(matches!(err, RunError::Validation(_)));
        assert!(err.to_string().contains("weather file required"));
    }

    #[test]
    fn design_day_ignores_weather() {
        let dir = tempfile::tempdir().unwrap();
        let spec = RunSpec::new(model_in(dir.path()), dir.path().join("out"))
            .weather(dir.path().join("missing.epw"))
            .design_day();
        assert_eq!(spec.validate().unwrap(), None);
    }

    #[test]
    fn missing_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let spec = RunSpec::new(dir.path().join("nope.idf"), dir.path()).design_day();
        assert!(spec.validate().unwrap_err().to_string().contains("nope.idf"));
    }

    #[test]
    fn command_line_puts_model_last() {
        let spec = RunSpec::new("/m/office.idf", "/out")
            .weather("/w/chicago.epw")
            .annual()
            .expand_objects(true)
            .generate_csv(true)
            .output_prefix("run1");
        let args = spec.command_args(Some(Path::new("/ep/Energy+.idd")), Some(Path::new("/w/chicago.epw")));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "--idd",
                "/ep/Energy+.idd",
                "--output-directory",
                "/out",
                "--output-prefix",
                "run1",
                "--weather",
                "/w/chicago.epw",
                "--annual",
                "--expandobjects",
                "--readvars",
                "/m/office.idf",
            ]
        );
    }

    #[test]
    fn template_detection_ignores_comments() {
        assert!(model_uses_templates("  HVACTemplate:Zone:IdealLoadsAirSystem,\n"));
        assert!(!model_uses_templates("! HVACTemplate:Zone:IdealLoadsAirSystem,\n"));
        assert!(!model_uses_templates("Zone,Office;\n"));
    }
}
