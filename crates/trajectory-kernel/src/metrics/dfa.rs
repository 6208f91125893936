//! Detrended Fluctuation Analysis over the velocity series.
//!
//! Interpretation convention (preserved verbatim for comparability with
//! prior results): α < 0.5 anti-persistent, α ≈ 0.5 uncorrelated random
//! walk, α > 1.0 persistent/coherent long-range structure.

use crate::config::MetricsConfig;
use crate::error::MetricError;
use crate::metrics::MetricResult;

const METRIC: &str = "dfa_alpha";

/// How many candidate window sizes to enumerate before capping by series
/// length. Sizes grow geometrically, so 32 reaches far past any realistic
/// session.
const MAX_CANDIDATE_WINDOWS: usize = 32;

/// Estimate the long-range correlation exponent α of a series.
///
/// Window sizes follow the configured geometric progression (or the explicit
/// override), bounded below by `dfa_min_window` and above by `len/4`. At
/// least 4 distinct usable sizes are required; each has at least 4
/// non-overlapping windows by construction of the upper bound.
pub fn dfa_alpha(series: &[f64], config: &MetricsConfig) -> MetricResult {
    let n = series.len();
    let min_window = config.dfa_min_window.max(2);

    let candidates: Vec<usize> = match &config.dfa_windows {
        Some(explicit) => {
            let mut sizes: Vec<usize> = explicit
                .iter()
                .copied()
                .filter(|&s| s >= min_window)
                .collect();
            sizes.sort_unstable();
            sizes.dedup();
            sizes
        }
        None => geometric_progression(min_window, config.dfa_window_ratio),
    };

    if candidates.len() < 4 {
        return Err(MetricError::degenerate(
            METRIC,
            "fewer than 4 distinct window sizes configured",
        ));
    }

    let cap = n / 4;
    let usable: Vec<usize> = candidates.iter().copied().filter(|&s| s <= cap).collect();
    if usable.len() < 4 {
        // The 4th window size must fit under len/4 for α to be defined.
        let needed = candidates[3].saturating_mul(4);
        return Err(MetricError::insufficient(METRIC, needed, n));
    }

    // Profile: cumulative sum of the centered series.
    let mean = series.iter().sum::<f64>() / n as f64;
    let mut profile = Vec::with_capacity(n);
    let mut acc = 0.0;
    for v in series {
        acc += v - mean;
        profile.push(acc);
    }

    // F(s): RMS of linearly detrended residuals over non-overlapping windows.
    let mut log_points = Vec::with_capacity(usable.len());
    for &s in &usable {
        let window_count = n / s;
        let mut sq_residuals = 0.0;
        for w in 0..window_count {
            sq_residuals += detrended_sq_residuals(&profile[w * s..(w + 1) * s]);
        }
        let fluctuation = (sq_residuals / (window_count * s) as f64).sqrt();
        if fluctuation > 0.0 {
            log_points.push(((s as f64).ln(), fluctuation.ln()));
        }
    }

    if log_points.len() < 4 {
        return Err(MetricError::degenerate(
            METRIC,
            "series carries no fluctuation at enough scales",
        ));
    }

    let (slope, _intercept) = linear_fit_points(&log_points);
    Ok(slope)
}

/// Window sizes `min, round(min*r), ...`, strictly increasing.
fn geometric_progression(min_window: usize, ratio: f64) -> Vec<usize> {
    let mut sizes = Vec::with_capacity(MAX_CANDIDATE_WINDOWS);
    let mut w = min_window;
    while sizes.len() < MAX_CANDIDATE_WINDOWS {
        sizes.push(w);
        let next = (w as f64 * ratio).round() as usize;
        w = next.max(w + 1);
    }
    sizes
}

/// Sum of squared residuals after removing the least-squares linear trend.
fn detrended_sq_residuals(window: &[f64]) -> f64 {
    let points: Vec<(f64, f64)> = window
        .iter()
        .enumerate()
        .map(|(i, &y)| (i as f64, y))
        .collect();
    let (slope, intercept) = linear_fit_points(&points);
    points
        .iter()
        .map(|(x, y)| {
            let r = y - (slope * x + intercept);
            r * r
        })
        .sum()
}

/// Least-squares fit `y = slope*x + intercept`.
fn linear_fit_points(points: &[(f64, f64)]) -> (f64, f64) {
    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xx: f64 = points.iter().map(|(x, _)| x * x).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();

    let denom = n * sum_xx - sum_x * sum_x;
    if denom == 0.0 {
        return (0.0, sum_y / n);
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;
    (slope, intercept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::rng_for;
    use rand::Rng;

    fn white_noise(len: usize, seed: u64) -> Vec<f64> {
        let mut rng = rng_for(seed, 0);
        (0..len).map(|_| rng.random_range(0.0..1.0)).collect()
    }

    #[test]
    fn short_series_is_insufficient() {
        // A 3-turn session yields a 2-point velocity series.
        let err = dfa_alpha(&[0.1, 0.2], &MetricsConfig::default()).unwrap_err();
        assert!(matches!(err, MetricError::InsufficientData { .. }));
    }

    #[test]
    fn constant_series_is_degenerate_not_zero() {
        let series = vec![0.5; 256];
        let err = dfa_alpha(&series, &MetricsConfig::default()).unwrap_err();
        assert!(matches!(err, MetricError::Degenerate { .. }));
    }

    #[test]
    fn white_noise_is_near_uncorrelated() {
        let series = white_noise(512, 7);
        let alpha = dfa_alpha(&series, &MetricsConfig::default()).unwrap();
        // i.i.d. noise sits at α ≈ 0.5; wide band to absorb estimator noise.
        assert!(alpha > 0.25 && alpha < 0.75, "alpha = {alpha}");
    }

    #[test]
    fn integrated_noise_is_persistent() {
        let noise = white_noise(512, 11);
        let mean = noise.iter().sum::<f64>() / noise.len() as f64;
        let mut acc = 0.0;
        let walk: Vec<f64> = noise
            .iter()
            .map(|v| {
                acc += v - mean;
                acc
            })
            .collect();
        let alpha = dfa_alpha(&walk, &MetricsConfig::default()).unwrap();
        assert!(alpha > 1.0, "alpha = {alpha}");
    }

    #[test]
    fn explicit_window_override_is_honored() {
        let series = white_noise(512, 13);
        let config = MetricsConfig {
            dfa_windows: Some(vec![4, 8, 16, 32, 64]),
            ..MetricsConfig::default()
        };
        let alpha = dfa_alpha(&series, &config).unwrap();
        assert!(alpha.is_finite());
    }

    #[test]
    fn too_few_explicit_windows_is_degenerate() {
        let series = white_noise(512, 17);
        let config = MetricsConfig {
            dfa_windows: Some(vec![4, 8]),
            ..MetricsConfig::default()
        };
        let err = dfa_alpha(&series, &config).unwrap_err();
        assert!(matches!(err, MetricError::Degenerate { .. }));
    }

    #[test]
    fn estimate_is_deterministic() {
        let series = white_noise(256, 23);
        let a = dfa_alpha(&series, &MetricsConfig::default()).unwrap();
        let b = dfa_alpha(&series, &MetricsConfig::default()).unwrap();
        assert_eq!(a, b);
    }
}
