//! Diagnostic counts from the simulator's `.err` log.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{ExtractError, ExtractResult};

static SEVERITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\*\*\s+(Fatal|Severe|Warning|~~~)\s+\*\*").expect("severity pattern is a valid regex")
});

/// Maximum number of message lines kept in a summary.
pub const MAX_MESSAGE_LINES: usize = 20;

const COMPLETED_FOOTER: &str = "EnergyPlus Completed Successfully";
const TERMINATED_FOOTER: &str = "EnergyPlus Terminated";

/// Locate an output artifact by extension.
///
/// Tries `<prefix><ext>`, then `eplusout<ext>` and `eplus<ext>`, then the
/// first file (by name) in `dir` ending with `ext`.
pub fn find_artifact(dir: &Path, prefix: Option<&str>, ext: &str) -> Option<PathBuf> {
    let mut names = Vec::new();
    if let Some(p) = prefix.filter(|p| !p.is_empty()) {
        names.push(format!("{p}{ext}"));
    }
    names.push(format!("eplusout{ext}"));
    names.push(format!("eplus{ext}"));

    if let Some(hit) = names.iter().map(|n| dir.join(n)).find(|p| p.is_file()) {
        return Some(hit);
    }

    let mut matches: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .map(|n| n.to_string_lossy().ends_with(ext))
                    .unwrap_or(false)
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}

/// Severity counts and leading messages from one `.err` log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticSummary {
    /// Log that was parsed; `None` when no log exists.
    pub log_path: Option<PathBuf>,
    pub fatal: usize,
    pub severe: usize,
    pub warning: usize,
    /// First messages, continuation lines included.
    pub lines: Vec<String>,
    pub completed_successfully: bool,
    pub terminated: bool,
    /// Log missing or truncated before either footer was written.
    pub incomplete: bool,
}

impl DiagnosticSummary {
    /// Summary for a run that produced no log at all.
    pub fn missing() -> Self {
        Self {
            incomplete: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy)]
enum LineKind {
    Fatal,
    Severe,
    Warning,
    Continuation,
}

fn classify(line: &str) -> Option<LineKind> {
    let caps = SEVERITY_RE.captures(line)?;
    match &caps[1] {
        "Fatal" => Some(LineKind::Fatal),
        "Severe" => Some(LineKind::Severe),
        "Warning" => Some(LineKind::Warning),
        _ => Some(LineKind::Continuation),
    }
}

/// Count diagnostics in `text`. Counting covers every line; only the first
/// [`MAX_MESSAGE_LINES`] message lines are retained.
pub fn summarize_log(text: &str) -> DiagnosticSummary {
    let mut summary = DiagnosticSummary::default();
    // Continuations only attach to a message that was itself kept.
    let mut last_kept = false;

    for raw in text.lines() {
        let line = raw.trim();
        if line.contains(COMPLETED_FOOTER) {
            summary.completed_successfully = true;
        } else if line.contains(TERMINATED_FOOTER) {
            summary.terminated = true;
        }

        let Some(kind) = classify(line) else {
            continue;
        };
        match kind {
            LineKind::Fatal => summary.fatal += 1,
            LineKind::Severe => summary.severe += 1,
            LineKind::Warning => summary.warning += 1,
            LineKind::Continuation => {
                if last_kept && summary.lines.len() < MAX_MESSAGE_LINES {
                    summary.lines.push(line.to_string());
                }
                continue;
            }
        }
        last_kept = summary.lines.len() < MAX_MESSAGE_LINES;
        if last_kept {
            summary.lines.push(line.to_string());
        }
    }

    summary.incomplete = !summary.completed_successfully && !summary.terminated;
    summary
}

/// Parse one `.err` file.
pub fn parse_diagnostics(path: &Path) -> ExtractResult<DiagnosticSummary> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::io(path, e))?;
    let mut summary = summarize_log(&String::from_utf8_lossy(&bytes));
    summary.log_path = Some(path.to_path_buf());
    Ok(summary)
}

/// Find and parse the `.err` log of a run directory. A missing log yields
/// [`DiagnosticSummary::missing`], not an error.
pub fn diagnostics_for_dir(dir: &Path, prefix: Option<&str>) -> ExtractResult<DiagnosticSummary> {
    match find_artifact(dir, prefix, ".err") {
        Some(path) => parse_diagnostics(&path),
        None => Ok(DiagnosticSummary::missing()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Program Version,EnergyPlus, Version 23.2.0
   ** Warning ** GetVertices: Distance between two vertices < .01, possibly coincident.
   **   ~~~   ** for Surface=WALL-1, in Zone=ZONE ONE
   ** Warning ** Weather file location will be used rather than entered Location object.
   ** Severe  ** Node not found = SUPPLY INLET NODE
   **  Fatal  ** Errors occurred on processing input file. Preceding condition(s) cause termination.
   ************* EnergyPlus Terminated--Fatal Error Detected. 2 Warning; 1 Severe Errors;
";

    #[test]
    fn counts_each_severity() {
        let s = summarize_log(SAMPLE);
        assert_eq!(s.warning, 2);
        assert_eq!(s.severe, 1);
        assert_eq!(s.fatal, 1);
        assert!(s.terminated);
        assert!(!s.completed_successfully);
        assert!(!s.incomplete);
        assert_eq!(s.lines.len(), 5);
        assert!(s.lines[1].contains("for Surface=WALL-1"));
    }

    #[test]
    fn single_space_fatal_form_is_counted() {
        let s = summarize_log("** Fatal ** out of memory\n");
        assert_eq!(s.fatal, 1);
    }

    #[test]
    fn truncated_log_is_incomplete() {
        let s = summarize_log("   ** Warning ** something\n   ** Warn");
        assert_eq!(s.warning, 1);
        assert!(s.incomplete);
    }

    #[test]
    fn successful_footer_is_detected() {
        let s = summarize_log(
            "   ************* EnergyPlus Completed Successfully-- 0 Warning; 0 Severe Errors;\n",
        );
        assert!(s.completed_successfully);
        assert_eq!(s.fatal + s.severe + s.warning, 0);
    }

    #[test]
    fn message_lines_are_capped_but_counts_are_not() {
        let text: String = (0..50)
            .map(|i| format!("   ** Warning ** w{i}\n"))
            .collect();
        let s = summarize_log(&text);
        assert_eq!(s.warning, 50);
        assert_eq!(s.lines.len(), MAX_MESSAGE_LINES);
    }

    #[test]
    fn find_artifact_prefers_prefix_then_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zzz.err"), "").unwrap();
        assert_eq!(
            find_artifact(dir.path(), Some("run1"), ".err"),
            Some(dir.path().join("zzz.err"))
        );

        std::fs::write(dir.path().join("eplusout.err"), "").unwrap();
        assert_eq!(
            find_artifact(dir.path(), Some("run1"), ".err"),
            Some(dir.path().join("eplusout.err"))
        );

        std::fs::write(dir.path().join("run1.err"), "").unwrap();
        assert_eq!(
            find_artifact(dir.path(), Some("run1"), ".err"),
            Some(dir.path().join("run1.err"))
        );
    }

    #[test]
    fn missing_log_is_flagged_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let s = diagnostics_for_dir(dir.path(), None).unwrap();
        assert!(s.incomplete);
        assert!(s.log_path.is_none());
    }
}
