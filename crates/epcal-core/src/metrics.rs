//! Calibration statistics (ASHRAE Guideline 14).
//!
//! All functions are pure: identical inputs always produce identical
//! outputs. Errors carry enough context for the caller to report which
//! series or setting was at fault; nothing is persisted on failure.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Means smaller than this are treated as zero.
const EPSILON: f64 = 1e-10;

/// Errors produced by the metrics engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricsError {
    #[error("series misaligned: {simulated} simulated vs {measured} measured points (need equal lengths, at least 2)")]
    Alignment { simulated: usize, measured: usize },

    #[error("mean of measured series is zero; cv(rmse) and nmbe are undefined")]
    DegenerateSeries,

    #[error("non-finite value at index {index} in {series} series")]
    NonFinite { series: &'static str, index: usize },

    #[error("unknown granularity '{0}' (expected 'hourly' or 'monthly')")]
    Configuration(String),
}

/// Result type for metrics operations.
pub type MetricsResult<T> = std::result::Result<T, MetricsError>;

/// Data interval, which selects the compliance thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hourly,
    Monthly,
}

/// Guideline 14 acceptance limits, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub cv_rmse_max: f64,
    pub nmbe_abs_max: f64,
}

impl Granularity {
    pub fn thresholds(self) -> Thresholds {
        match self {
            Granularity::Hourly => Thresholds {
                cv_rmse_max: 30.0,
                nmbe_abs_max: 10.0,
            },
            Granularity::Monthly => Thresholds {
                cv_rmse_max: 15.0,
                nmbe_abs_max: 5.0,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Hourly => "hourly",
            Granularity::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = MetricsError;

    fn from_str(s: &str) -> MetricsResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(Granularity::Hourly),
            "monthly" => Ok(Granularity::Monthly),
            other => Err(MetricsError::Configuration(other.to_string())),
        }
    }
}

/// Goodness-of-fit statistics for one simulated/measured pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    pub n_points: usize,
    pub rmse: f64,
    /// Percent.
    pub cv_rmse: f64,
    pub mbe: f64,
    /// Percent; positive means the model over-predicts.
    pub nmbe: f64,
    /// `None` when the measured series is constant and the fit is not exact.
    pub r2: Option<f64>,
    /// Largest absolute difference.
    pub max_deviation: f64,
    pub max_deviation_index: usize,
    pub mean_measured: f64,
    pub mean_simulated: f64,
    pub granularity: Granularity,
}

impl MetricSet {
    /// Guideline 14 verdict at this set's granularity.
    pub fn passes(&self) -> bool {
        passes_guideline14(self.cv_rmse, self.nmbe, self.granularity)
    }
}

/// `cv_rmse <= limit && |nmbe| <= limit` for the granularity.
pub fn passes_guideline14(cv_rmse: f64, nmbe: f64, granularity: Granularity) -> bool {
    let t = granularity.thresholds();
    cv_rmse <= t.cv_rmse_max && nmbe.abs() <= t.nmbe_abs_max
}

fn check_finite(series: &'static str, values: &[f64]) -> MetricsResult<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(MetricsError::NonFinite { series, index }),
        None => Ok(()),
    }
}

/// Compute the full metric set for aligned series.
pub fn compute(simulated: &[f64], measured: &[f64], granularity: Granularity) -> MetricsResult<MetricSet> {
    if simulated.len() != measured.len() || simulated.len() < 2 {
        return Err(MetricsError::Alignment {
            simulated: simulated.len(),
            measured: measured.len(),
        });
    }
    check_finite("simulated", simulated)?;
    check_finite("measured", measured)?;

    let n = simulated.len() as f64;
    let mean_measured = measured.iter().sum::<f64>() / n;
    let mean_simulated = simulated.iter().sum::<f64>() / n;
    if mean_measured.abs() < EPSILON {
        return Err(MetricsError::DegenerateSeries);
    }

    let mut sum_diff = 0.0;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    let mut max_deviation = 0.0_f64;
    let mut max_deviation_index = 0;
    for (i, (s, m)) in simulated.iter().zip(measured).enumerate() {
        let diff = s - m;
        sum_diff += diff;
        ss_res += diff * diff;
        ss_tot += (m - mean_measured).powi(2);
        if diff.abs() > max_deviation {
            max_deviation = diff.abs();
            max_deviation_index = i;
        }
    }

    let rmse = (ss_res / n).sqrt();
    let mbe = sum_diff / n;
    // Net-export series have a negative mean; ratios use its magnitude.
    let scale = mean_measured.abs();
    let r2 = if ss_tot > EPSILON {
        Some(1.0 - ss_res / ss_tot)
    } else if ss_res < EPSILON {
        Some(1.0)
    } else {
        None
    };

    Ok(MetricSet {
        n_points: simulated.len(),
        rmse,
        cv_rmse: rmse / scale * 100.0,
        mbe,
        nmbe: mbe / scale * 100.0,
        r2,
        max_deviation,
        max_deviation_index,
        mean_measured,
        mean_simulated,
        granularity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn identical_series_are_a_perfect_fit() {
        let v = [20.0, 21.0, 22.0, 21.0];
        let m = compute(&v, &v, Granularity::Hourly).unwrap();
        assert_eq!(m.rmse, 0.0);
        assert_eq!(m.cv_rmse, 0.0);
        assert_eq!(m.nmbe, 0.0);
        assert_eq!(m.r2, Some(1.0));
        assert!(m.passes());
    }

    #[test]
    fn worked_example_passes_hourly() {
        let measured = [20.0, 21.0, 22.0, 21.0];
        let simulated = [20.5, 20.8, 22.3, 20.9];
        let m = compute(&simulated, &measured, Granularity::Hourly).unwrap();

        // diffs 0.5, -0.2, 0.3, -0.1
        assert!(close(m.rmse, (0.39_f64 / 4.0).sqrt()));
        assert!(close(m.mbe, 0.125));
        assert!(close(m.cv_rmse, (0.39_f64 / 4.0).sqrt() / 21.0 * 100.0));
        assert!(close(m.nmbe, 0.125 / 21.0 * 100.0));
        assert!(close(m.max_deviation, 0.5));
        assert_eq!(m.max_deviation_index, 0);
        assert!(close(m.r2.unwrap(), 1.0 - 0.39 / 2.0));
        assert!(m.passes());
    }

    #[test]
    fn scaling_preserves_relative_metrics() {
        let measured = [10.0, 12.0, 9.0, 11.0, 13.0];
        let simulated = [11.0, 11.5, 9.5, 10.0, 14.0];
        let base = compute(&simulated, &measured, Granularity::Monthly).unwrap();

        let c = 3.5;
        let ms: Vec<f64> = measured.iter().map(|v| v * c).collect();
        let ss: Vec<f64> = simulated.iter().map(|v| v * c).collect();
        let scaled = compute(&ss, &ms, Granularity::Monthly).unwrap();

        assert!(close(scaled.cv_rmse, base.cv_rmse));
        assert!(close(scaled.nmbe, base.nmbe));
        assert!(close(scaled.rmse, base.rmse * c));
    }

    #[test]
    fn length_mismatch_and_short_series_are_rejected() {
        assert_eq!(
            compute(&[1.0, 2.0], &[1.0], Granularity::Hourly),
            Err(MetricsError::Alignment {
                simulated: 2,
                measured: 1
            })
        );
        assert!(matches!(
            compute(&[1.0], &[1.0], Granularity::Hourly),
            Err(MetricsError::Alignment { .. })
        ));
    }

    #[test]
    fn negative_mean_measured_uses_magnitude() {
        let sim = [-10.0, -200.0, -10.0, -200.0];
        let meas = [-100.0; 4];
        let m = compute(&sim, &meas, Granularity::Hourly).unwrap();
        assert!(close(m.cv_rmse, 9050.0_f64.sqrt()));
        assert!(close(m.nmbe, -5.0));
        assert!(m.cv_rmse > 0.0);
        assert!(!m.passes());

        let good = compute(&[-98.0, -103.0, -99.0, -101.0], &meas, Granularity::Hourly).unwrap();
        assert!(good.cv_rmse > 0.0);
        assert!(good.passes());
    }

    #[test]
    fn zero_mean_measured_is_degenerate() {
        let err = compute(&[1.0, -1.0], &[1.0, -1.0], Granularity::Hourly).unwrap_err();
        assert_eq!(err, MetricsError::DegenerateSeries);
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let err = compute(&[1.0, f64::NAN], &[1.0, 2.0], Granularity::Hourly).unwrap_err();
        assert_eq!(
            err,
            MetricsError::NonFinite {
                series: "simulated",
                index: 1
            }
        );
    }

    #[test]
    fn constant_measured_with_error_has_no_r2() {
        let m = compute(&[5.0, 6.0], &[5.0, 5.0], Granularity::Hourly).unwrap();
        assert_eq!(m.r2, None);
    }

    #[test]
    fn thresholds_differ_by_granularity() {
        assert!(passes_guideline14(20.0, -8.0, Granularity::Hourly));
        assert!(!passes_guideline14(20.0, -8.0, Granularity::Monthly));
        assert!(!passes_guideline14(31.0, 0.0, Granularity::Hourly));
    }

    #[test]
    fn granularity_parsing() {
        assert_eq!("Monthly".parse::<Granularity>().unwrap(), Granularity::Monthly);
        assert_eq!(
            "daily".parse::<Granularity>(),
            Err(MetricsError::Configuration("daily".to_string()))
        );
    }
}
