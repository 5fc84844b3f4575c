//! On-disk layout of a calibration run directory.
//!
//! ```text
//! <run_dir>/run_meta.json
//! <run_dir>/iteration_log.jsonl
//! <run_dir>/iteration_log.csv
//! <run_dir>/model_versions/iter_NNN_<tag>.<ext>
//! <run_dir>/metrics/iter_NNN_metrics.json
//! <run_dir>/notes/iter_NNN.md
//! <run_dir>/.ledger.lock
//! ```

use std::path::{Path, PathBuf};

pub const META_FILE: &str = "run_meta.json";
pub const JSONL_LOG: &str = "iteration_log.jsonl";
pub const CSV_LOG: &str = "iteration_log.csv";
pub const LOCK_FILE: &str = ".ledger.lock";
pub const MODELS_DIR: &str = "model_versions";
pub const METRICS_DIR: &str = "metrics";
pub const NOTES_DIR: &str = "notes";

/// Path helpers for one run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerLayout {
    root: PathBuf,
}

impl LedgerLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> PathBuf {
        self.root.join(META_FILE)
    }

    pub fn jsonl_log(&self) -> PathBuf {
        self.root.join(JSONL_LOG)
    }

    pub fn csv_log(&self) -> PathBuf {
        self.root.join(CSV_LOG)
    }

    pub fn lock(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn subdirs(&self) -> [PathBuf; 3] {
        [
            self.root.join(MODELS_DIR),
            self.root.join(METRICS_DIR),
            self.root.join(NOTES_DIR),
        ]
    }

    /// Snapshot path relative to the run directory.
    pub fn model_snapshot(iteration: u32, tag: &str, ext: &str) -> PathBuf {
        let ext = if ext.is_empty() { "idf" } else { ext };
        Path::new(MODELS_DIR).join(format!("iter_{iteration:03}_{}.{ext}", slugify(tag)))
    }

    pub fn metrics_file(&self, iteration: u32) -> PathBuf {
        self.root
            .join(METRICS_DIR)
            .join(format!("iter_{iteration:03}_metrics.json"))
    }

    pub fn note_file(&self, iteration: u32) -> PathBuf {
        self.root.join(NOTES_DIR).join(format!("iter_{iteration:03}.md"))
    }
}

/// File-name-safe version of a free-form tag: lowercase ASCII alphanumerics
/// and single underscores, at most 40 characters.
pub fn slugify(tag: &str) -> String {
    let mut out = String::new();
    for c in tag.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let out: String = out.trim_matches('_').chars().take(40).collect();
    let out = out.trim_end_matches('_').to_string();
    if out.is_empty() {
        "model".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Wall R-value +20%"), "wall_r_value_20");
        assert_eq!(slugify("  --  "), "model");
        assert_eq!(slugify("a".repeat(60).as_str()).len(), 40);
    }

    #[test]
    fn iteration_files_are_zero_padded() {
        let layout = LedgerLayout::new("/runs/office");
        assert_eq!(
            layout.metrics_file(7),
            PathBuf::from("/runs/office/metrics/iter_007_metrics.json")
        );
        assert_eq!(
            LedgerLayout::model_snapshot(12, "Infiltration x1.5", "idf"),
            PathBuf::from("model_versions/iter_012_infiltration_x1_5.idf")
        );
    }
}
