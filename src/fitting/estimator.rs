//! Peak-estimate fit engine for cavity transmission scans.
//!
//! Peaks are the maxima of contiguous regions above a relative threshold; the N highest
//! are kept (N from the model) and ordered by position. Widths come from linearly
//! interpolated half-maximum crossings, positions from a three-point parabolic
//! refinement. The reported curve is the offset plus the sum of the estimated
//! Lorentzians, and `chi_sqr` is the sum of squared residuals against it.
//!
//! No least-squares refinement is done, so `chi_sqr` is an unweighted residual in V² and
//! scales with the record length and signal level. It is not comparable to the reduced
//! chi² of a least-squares fit, and `fit.chi_threshold` has to be chosen for this
//! engine when it is the one in use.

use async_trait::async_trait;
use tracing::debug;

use crate::fitting::{lorentzian, FitEngine, FitModel, FitOutput, FitParameter, FitResult};

/// One detected line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakEstimate {
    /// Sample index of the maximum
    pub index: usize,
    /// Interpolated centre, in x units
    pub position: f64,
    /// Height above the baseline
    pub amplitude: f64,
    /// Full width at half maximum, in x units
    pub fwhm: f64,
}

/// Reference [`FitEngine`] estimating Lorentzian lines directly from the samples
#[derive(Debug, Clone)]
pub struct LorentzianEstimator {
    /// Detection threshold as a fraction of the trace's peak-to-peak range
    pub rel_threshold: f64,
}

impl Default for LorentzianEstimator {
    fn default() -> Self {
        Self { rel_threshold: 0.1 }
    }
}

impl LorentzianEstimator {
    /// Estimator with a custom detection threshold
    pub fn new(rel_threshold: f64) -> Self {
        Self { rel_threshold }
    }

    /// Locate up to `count` peaks, ordered by position.
    ///
    /// Returns `None` when the trace is flat or fewer than `count` peaks stand out.
    pub fn find_peaks(&self, x: &[f64], y: &[f64], count: usize) -> Option<(f64, Vec<PeakEstimate>)> {
        let n = x.len().min(y.len());
        if n < 3 || count == 0 {
            return None;
        }
        let baseline = y[..n].iter().copied().fold(f64::INFINITY, f64::min);
        let maximum = y[..n].iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = maximum - baseline;
        if range.is_nan() || range <= 0.0 {
            return None;
        }
        let threshold = baseline + self.rel_threshold * range;

        // argmax of every contiguous region above threshold
        let mut candidates: Vec<usize> = Vec::new();
        let mut region_max: Option<usize> = None;
        for i in 0..n {
            if y[i] > threshold {
                region_max = match region_max {
                    Some(best) if y[best] >= y[i] => Some(best),
                    _ => Some(i),
                };
            } else if let Some(best) = region_max.take() {
                candidates.push(best);
            }
        }
        if let Some(best) = region_max {
            candidates.push(best);
        }
        if candidates.len() < count {
            return None;
        }

        candidates.sort_by(|&a, &b| y[b].total_cmp(&y[a]));
        candidates.truncate(count);
        candidates.sort_unstable();

        let peaks = candidates
            .into_iter()
            .map(|index| PeakEstimate {
                index,
                position: refine_position(x, y, index),
                amplitude: y[index] - baseline,
                fwhm: half_max_width(x, y, index, baseline),
            })
            .collect();
        Some((baseline, peaks))
    }
}

fn refine_position(x: &[f64], y: &[f64], p: usize) -> f64 {
    if p == 0 || p + 1 >= x.len().min(y.len()) {
        return x[p];
    }
    let denom = y[p - 1] - 2.0 * y[p] + y[p + 1];
    if denom == 0.0 {
        return x[p];
    }
    let delta = (0.5 * (y[p - 1] - y[p + 1]) / denom).clamp(-0.5, 0.5);
    x[p] + delta * (x[p + 1] - x[p - 1]) / 2.0
}

fn half_max_width(x: &[f64], y: &[f64], p: usize, baseline: f64) -> f64 {
    let n = x.len().min(y.len());
    let half = baseline + (y[p] - baseline) / 2.0;
    let crossing = |i: usize, j: usize| {
        // y[i] <= half < y[j]
        let frac = (half - y[i]) / (y[j] - y[i]);
        x[i] + frac * (x[j] - x[i])
    };

    let mut left = x[0];
    let mut i = p;
    while i > 0 {
        if y[i - 1] <= half {
            left = crossing(i - 1, i);
            break;
        }
        i -= 1;
    }

    let mut right = x[n - 1];
    let mut j = p;
    while j + 1 < n {
        if y[j + 1] <= half {
            right = crossing(j + 1, j);
            break;
        }
        j += 1;
    }
    (right - left).abs()
}

#[async_trait]
impl FitEngine for LorentzianEstimator {
    async fn fit(&self, model: FitModel, x: &[f64], y: &[f64]) -> anyhow::Result<FitOutput> {
        let count = model.peak_count();
        if count == 0 {
            return Ok(FitOutput::default());
        }
        let Some((baseline, peaks)) = self.find_peaks(x, y, count) else {
            debug!(model = %model, "no peaks found, fit did not converge");
            return Ok(FitOutput {
                fit_x: x.to_vec(),
                fit_y: Vec::new(),
                result: None,
            });
        };

        let fit_y: Vec<f64> = x
            .iter()
            .map(|&xi| {
                baseline
                    + peaks
                        .iter()
                        .map(|pk| lorentzian(xi, pk.position, pk.fwhm, pk.amplitude))
                        .sum::<f64>()
            })
            .collect();
        let chi_sqr: f64 = y
            .iter()
            .zip(&fit_y)
            .map(|(yi, fi)| (yi - fi).powi(2))
            .sum();
        let rms = (chi_sqr / y.len().max(1) as f64).sqrt();
        let dx = if x.len() > 1 { (x[1] - x[0]).abs() } else { 0.0 };

        let mut result = FitResult::new();
        if count == 1 {
            let pk = peaks[0];
            result.insert("Position", FitParameter::new(pk.position, dx / 2.0));
            result.insert("Amplitude", FitParameter::new(pk.amplitude, rms));
            result.insert("FWHM", FitParameter::new(pk.fwhm, dx));
        } else {
            for (i, pk) in peaks.iter().enumerate() {
                result.insert(format!("Position {i}"), FitParameter::new(pk.position, dx / 2.0));
                result.insert(format!("Amplitude {i}"), FitParameter::new(pk.amplitude, rms));
                result.insert(format!("FWHM {i}"), FitParameter::new(pk.fwhm, dx));
            }
            if count == 2 {
                result.insert(
                    "Splitting",
                    FitParameter::new(peaks[1].position - peaks[0].position, dx),
                );
            } else {
                result.insert(
                    "Splitting left",
                    FitParameter::new(peaks[1].position - peaks[0].position, dx),
                );
                result.insert(
                    "Splitting right",
                    FitParameter::new(peaks[2].position - peaks[1].position, dx),
                );
            }
        }
        result.insert("Offset", FitParameter::new(baseline, rms));
        result.insert("chi_sqr", FitParameter::new(chi_sqr, 0.0));

        Ok(FitOutput {
            fit_x: x.to_vec(),
            fit_y,
            result: Some(result),
        })
    }
}
