//! Environment check ("doctor") built on the discovery chains.
//!
//! Walks both chains without failing fast and turns the outcome into a
//! verdict plus copy-paste fix instructions. Never starts the simulator.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{
    walk_chain, Artifact, ChainOutcome, LookupContext, Overrides, ResolverEnv, TraceEntry,
    EXECUTABLE_CHAIN, SCHEMA_CHAIN,
};

/// Overall environment verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// Executable and schema resolved.
    Pass,
    /// Executable resolved; the simulator will use its bundled schema.
    Warn,
    /// Executable missing, or an explicit override does not exist.
    Fail,
}

/// Full diagnostic report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorReport {
    pub verdict: Verdict,
    pub executable: Option<PathBuf>,
    pub schema: Option<PathBuf>,
    pub reasons: Vec<String>,
    pub trace: Vec<TraceEntry>,
}

/// Run both chains and classify the result.
pub fn diagnose(overrides: &Overrides, env: &ResolverEnv) -> DoctorReport {
    let mut trace = Vec::new();
    let mut reasons = Vec::new();
    let mut verdict = Verdict::Pass;

    let ctx = LookupContext {
        env,
        overrides,
        executable: None,
    };
    let executable = match walk_chain(Artifact::Executable, EXECUTABLE_CHAIN, &ctx, &mut trace) {
        ChainOutcome::Found(p) => Some(p),
        ChainOutcome::NotFound => {
            verdict = Verdict::Fail;
            reasons.push("energyplus executable not resolved".to_string());
            None
        }
        ChainOutcome::OverrideMissing(p) => {
            verdict = Verdict::Fail;
            reasons.push(format!("executable override does not exist: {}", p.display()));
            None
        }
    };

    let ctx = LookupContext {
        executable: executable.as_deref(),
        ..ctx
    };
    let schema = match walk_chain(Artifact::Schema, SCHEMA_CHAIN, &ctx, &mut trace) {
        ChainOutcome::Found(p) => Some(p),
        ChainOutcome::NotFound => {
            if overrides.require_schema {
                verdict = Verdict::Fail;
            } else if verdict == Verdict::Pass {
                verdict = Verdict::Warn;
            }
            reasons.push("Energy+.idd not resolved".to_string());
            None
        }
        ChainOutcome::OverrideMissing(p) => {
            verdict = Verdict::Fail;
            reasons.push(format!("schema override does not exist: {}", p.display()));
            None
        }
    };

    DoctorReport {
        verdict,
        executable,
        schema,
        reasons,
        trace,
    }
}

impl DoctorReport {
    /// Human-readable report with per-step trace and, unless the verdict is
    /// PASS, fix instructions.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (label, artifact, selected) in [
            ("EnergyPlus executable", Artifact::Executable, &self.executable),
            ("Energy+.idd", Artifact::Schema, &self.schema),
        ] {
            let _ = writeln!(out, "=== Discovery: {label} ===");
            for (idx, entry) in self
                .trace
                .iter()
                .filter(|e| e.artifact == artifact)
                .enumerate()
            {
                let _ = writeln!(out, "  [{}] {}", idx + 1, entry);
            }
            match selected {
                Some(p) => {
                    let _ = writeln!(out, "  -> Selected: {}", p.display());
                }
                None => out.push_str("  -> Selected: (none)\n"),
            }
            out.push('\n');
        }

        let verdict = match self.verdict {
            Verdict::Pass => "PASS",
            Verdict::Warn => "WARN",
            Verdict::Fail => "FAIL",
        };
        let _ = write!(out, "Environment check: {verdict}");
        if !self.reasons.is_empty() {
            let _ = write!(out, " ({})", self.reasons.join("; "));
        }
        out.push('\n');

        if self.verdict != Verdict::Pass {
            out.push('\n');
            out.push_str(&fix_instructions());
        }
        out
    }
}

/// Shell snippets that locate the newest installation and export the
/// discovery variables.
pub fn fix_instructions() -> String {
    let mut out = String::new();
    out.push_str("Fix (bash/zsh, auto-detect):\n");
    out.push_str(
        "  ep_exe=\"$(ls -1 /opt/EnergyPlus-*/energyplus /usr/local/EnergyPlus-*/energyplus \
         /Applications/EnergyPlus-*/energyplus 2>/dev/null | sort -V | tail -n 1)\"\n",
    );
    out.push_str(
        "  if [ -n \"$ep_exe\" ]; then export ENERGYPLUS_EXE=\"$ep_exe\"; \
         export ENERGYPLUS_IDD=\"$(dirname \"$ep_exe\")/Energy+.idd\"; fi\n",
    );
    out.push_str("Fix (PowerShell, persistent):\n");
    out.push_str("  setx ENERGYPLUS_EXE \"C:\\EnergyPlusV23-2-0\\energyplus.exe\"\n");
    out.push_str("  setx ENERGYPLUS_IDD \"C:\\EnergyPlusV23-2-0\\Energy+.idd\"\n");
    out.push_str("Or pass --energyplus-exe and --idd explicitly.\n");
    out
}
