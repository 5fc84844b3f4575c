use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Terminal state of one simulator invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    TimedOut,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Normalized outcome of one simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub status: RunStatus,
    /// `None` when the process was killed.
    pub exit_code: Option<i32>,
    pub duration_secs: f64,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub artifacts_dir: PathBuf,
    pub fatal_count: usize,
    pub severe_count: usize,
    pub warning_count: usize,
    /// The `.err` log was missing or cut short.
    pub log_incomplete: bool,
}

impl RunResult {
    /// Clean exit with no fatal diagnostics.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed && self.exit_code == Some(0) && self.fatal_count == 0
    }
}

/// Last `max_chars` characters of `text`.
pub fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: RunStatus, exit_code: Option<i32>, fatal: usize) -> RunResult {
        RunResult {
            status,
            exit_code,
            duration_secs: 1.0,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
            artifacts_dir: PathBuf::from("/out"),
            fatal_count: fatal,
            severe_count: 0,
            warning_count: 3,
            log_incomplete: false,
        }
    }

    #[test]
    fn success_needs_zero_exit_and_no_fatal() {
        assert!(result(RunStatus::Completed, Some(0), 0).is_success());
        assert!(!result(RunStatus::Failed, Some(1), 0).is_success());
        assert!(!result(RunStatus::Failed, Some(0), 1).is_success());
        assert!(!result(RunStatus::TimedOut, None, 0).is_success());
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("héllo wörld", 5), "wörld");
        assert_eq!(tail("short", 50), "short");
    }
}
