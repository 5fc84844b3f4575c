use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::record::IterationRecord;

/// One line of the calibration trend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationBrief {
    pub iteration: u32,
    pub model_version_tag: String,
    pub cv_rmse: f64,
    pub nmbe: f64,
    pub delta_cv_rmse: Option<f64>,
    pub delta_nmbe: Option<f64>,
    pub passes: bool,
}

impl From<&IterationRecord> for IterationBrief {
    fn from(r: &IterationRecord) -> Self {
        Self {
            iteration: r.iteration,
            model_version_tag: r.model_version_tag.clone(),
            cv_rmse: r.metrics.cv_rmse,
            nmbe: r.metrics.nmbe,
            delta_cv_rmse: r.delta_vs_previous.cv_rmse,
            delta_nmbe: r.delta_vs_previous.nmbe,
            passes: r.passes_compliance_check,
        }
    }
}

/// Progress of a calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub run_id: String,
    pub total_iterations: usize,
    /// Lowest CV(RMSE); the earliest iteration wins ties.
    pub best: Option<IterationBrief>,
    pub first_passing: Option<u32>,
    pub trend: Vec<IterationBrief>,
}

impl LedgerSummary {
    /// `records` must already be the effective rows in iteration order.
    pub fn from_records(run_id: &str, records: &[IterationRecord]) -> Self {
        Self::from_trend(run_id, records.iter().map(IterationBrief::from).collect())
    }

    fn from_trend(run_id: &str, trend: Vec<IterationBrief>) -> Self {
        let best = trend
            .iter()
            .filter(|b| b.cv_rmse.is_finite())
            .fold(None::<&IterationBrief>, |best, b| match best {
                Some(cur) if cur.cv_rmse <= b.cv_rmse => Some(cur),
                _ => Some(b),
            })
            .cloned();
        let first_passing = trend.iter().find(|b| b.passes).map(|b| b.iteration);

        Self {
            run_id: run_id.to_string(),
            total_iterations: trend.len(),
            best,
            first_passing,
            trend,
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Calibration Run Summary ===");
        let _ = writeln!(out, "  Run id:      {}", self.run_id);
        let _ = writeln!(out, "  Iterations:  {}", self.total_iterations);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Iteration | Model Version        | CV(RMSE)% |    NMBE% | Delta CV | Delta NMBE | PASS"
        );
        let _ = writeln!(out, "{}", "-".repeat(88));
        for b in &self.trend {
            let _ = writeln!(
                out,
                "{:>9} | {:<20} | {:>9.4} | {:>8.4} | {:>8} | {:>10} | {}",
                b.iteration,
                truncate(&b.model_version_tag, 20),
                b.cv_rmse,
                b.nmbe,
                signed(b.delta_cv_rmse),
                signed(b.delta_nmbe),
                b.passes
            );
        }
        let _ = writeln!(out);
        match &self.best {
            Some(b) => {
                let _ = writeln!(
                    out,
                    "Best iteration (lowest CV(RMSE)): {} ({}), cv_rmse={:.4}%",
                    b.iteration, b.model_version_tag, b.cv_rmse
                );
            }
            None => {
                let _ = writeln!(out, "Best iteration: none recorded");
            }
        }
        match self.first_passing {
            Some(i) => {
                let _ = writeln!(out, "First passing iteration: {i}");
            }
            None => {
                let _ = writeln!(out, "First passing iteration: none yet");
            }
        }
        out
    }
}

fn signed(value: Option<f64>) -> String {
    value.map(|v| format!("{v:+.4}")).unwrap_or_else(|| "-".to_string())
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brief(iteration: u32, cv: f64, passes: bool) -> IterationBrief {
        IterationBrief {
            iteration,
            model_version_tag: format!("v{iteration}"),
            cv_rmse: cv,
            nmbe: 1.0,
            delta_cv_rmse: None,
            delta_nmbe: None,
            passes,
        }
    }

    #[test]
    fn render_shows_best_and_first_passing() {
        let s = LedgerSummary::from_trend("r", vec![brief(0, 40.0, false), brief(1, 12.0, true), brief(2, 12.0, true)]);
        assert_eq!(s.best.as_ref().unwrap().iteration, 1);
        let text = s.render_text();
        assert!(text.contains("Best iteration (lowest CV(RMSE)): 1 (v1)"));
        assert!(text.contains("First passing iteration: 1"));
    }

    #[test]
    fn empty_summary_renders() {
        let s = LedgerSummary::from_records("r", &[]);
        assert_eq!(s.total_iterations, 0);
        assert!(s.render_text().contains("none recorded"));
    }
}
