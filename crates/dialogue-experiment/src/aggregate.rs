//! Cross-pair aggregation: summary statistics and significance tests.
//!
//! For each metric the aggregator reports the count of pairs with a defined
//! delta, the mean delta (always, flagged as point-estimate-only below two
//! pairs), the sample standard deviation, a paired significance test with
//! its two-tailed p-value, and the standardized paired effect size (Cohen's
//! d_z). Deltas that pass a skewness/kurtosis normality screen get a paired
//! t-test; otherwise a Wilcoxon signed-rank test with normal approximation.
//!
//! Aggregation is idempotent: every call recomputes from the full pair
//! collection, with no incremental state that could drift from the data.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pair::PairResult;

/// Normality screen thresholds. Applied only when enough deltas exist for
/// the sample moments to mean anything.
const NORMALITY_MIN_N: usize = 8;
const MAX_ABS_SKEWNESS: f64 = 1.0;
const MAX_ABS_EXCESS_KURTOSIS: f64 = 2.0;

/// Why a dispersion or significance statistic is undefined.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateError {
    /// Dispersion and significance need at least two pairs with a defined
    /// delta. The mean delta is still reported as a point estimate.
    #[error("{metric} has {actual} pair(s) with a defined delta; need at least 2")]
    InsufficientSample { metric: String, actual: usize },

    /// All deltas are identical: zero dispersion, so no dispersion-based
    /// test is defined.
    #[error("{metric} deltas are identical; dispersion-based test undefined")]
    DegenerateDeltas { metric: String },
}

/// Which paired test produced the statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    PairedT,
    WilcoxonSignedRank,
}

/// A completed paired significance test.
///
/// `statistic` is the t value for the t-test and the normal-approximation z
/// for the rank test. `effect_size` is Cohen's d_z in both cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceTest {
    pub kind: TestKind,
    pub statistic: f64,
    pub p_value: f64,
    pub effect_size: f64,
}

/// Aggregate statistics for one metric across all pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAggregate {
    /// Pairs with a defined delta for this metric.
    pub n: usize,
    /// Mean delta over defined pairs; `None` only when no pair defines one.
    pub mean_delta: Option<f64>,
    /// Sample standard deviation; needs n ≥ 2.
    pub std_dev: Option<f64>,
    /// Set when `mean_delta` is reported from fewer than 2 pairs.
    pub point_estimate_only: bool,
    /// The significance test, or the explicit reason it is undefined.
    pub test: Result<SignificanceTest, AggregateError>,
}

/// Per-metric aggregates for a whole experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentStats {
    pub mean_velocity: MetricAggregate,
    pub curvature: MetricAggregate,
    pub dfa_alpha: MetricAggregate,
    pub entropy_shift: MetricAggregate,
}

/// Recompute all aggregate statistics from the current pair collection.
pub fn aggregate(pairs: &[PairResult]) -> ExperimentStats {
    ExperimentStats {
        mean_velocity: aggregate_metric(
            "mean_velocity",
            pairs.iter().map(|p| p.deltas.mean_velocity),
        ),
        curvature: aggregate_metric("curvature", pairs.iter().map(|p| p.deltas.curvature)),
        dfa_alpha: aggregate_metric("dfa_alpha", pairs.iter().map(|p| p.deltas.dfa_alpha)),
        entropy_shift: aggregate_metric(
            "entropy_shift",
            pairs.iter().map(|p| p.deltas.entropy_shift),
        ),
    }
}

fn aggregate_metric(metric: &str, deltas: impl Iterator<Item = Option<f64>>) -> MetricAggregate {
    let defined: Vec<f64> = deltas.flatten().collect();
    let n = defined.len();

    if n < 2 {
        return MetricAggregate {
            n,
            mean_delta: (n == 1).then(|| defined[0]),
            std_dev: None,
            point_estimate_only: true,
            test: Err(AggregateError::InsufficientSample {
                metric: metric.to_string(),
                actual: n,
            }),
        };
    }

    let mean = mean(&defined);
    let sd = sample_std_dev(&defined, mean);

    let test = if sd == 0.0 {
        Err(AggregateError::DegenerateDeltas {
            metric: metric.to_string(),
        })
    } else {
        Ok(significance_test(&defined, mean, sd))
    };

    MetricAggregate {
        n,
        mean_delta: Some(mean),
        std_dev: Some(sd),
        point_estimate_only: false,
        test,
    }
}

fn significance_test(deltas: &[f64], mean: f64, sd: f64) -> SignificanceTest {
    let n = deltas.len();
    let effect_size = mean / sd;

    let use_t = n < NORMALITY_MIN_N || passes_normality_screen(deltas, mean);
    if use_t {
        let t = mean / (sd / (n as f64).sqrt());
        SignificanceTest {
            kind: TestKind::PairedT,
            statistic: t,
            p_value: student_t_two_tailed(t, n - 1),
            effect_size,
        }
    } else {
        let z = wilcoxon_signed_rank_z(deltas);
        SignificanceTest {
            kind: TestKind::WilcoxonSignedRank,
            statistic: z,
            p_value: normal_two_tailed(z),
            effect_size,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_std_dev(values: &[f64], mean: f64) -> f64 {
    let n = values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

/// Crude normality screen on sample skewness and excess kurtosis.
fn passes_normality_screen(values: &[f64], mean: f64) -> bool {
    let n = values.len() as f64;
    let m2 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    if m2 == 0.0 {
        return true;
    }
    let m3 = values.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / n;
    let m4 = values.iter().map(|v| (v - mean).powi(4)).sum::<f64>() / n;
    let skewness = m3 / m2.powf(1.5);
    let excess_kurtosis = m4 / (m2 * m2) - 3.0;
    skewness.abs() <= MAX_ABS_SKEWNESS && excess_kurtosis.abs() <= MAX_ABS_EXCESS_KURTOSIS
}

/// Wilcoxon signed-rank statistic, normal approximation.
///
/// Zero deltas are dropped; tied magnitudes share their average rank.
fn wilcoxon_signed_rank_z(deltas: &[f64]) -> f64 {
    let nonzero: Vec<f64> = deltas.iter().copied().filter(|d| *d != 0.0).collect();
    if nonzero.is_empty() {
        return 0.0;
    }

    let mut order: Vec<usize> = (0..nonzero.len()).collect();
    order.sort_by(|&a, &b| {
        nonzero[a]
            .abs()
            .partial_cmp(&nonzero[b].abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0; nonzero.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && nonzero[order[j + 1]].abs() == nonzero[order[i]].abs() {
            j += 1;
        }
        // Ranks are 1-based; ties get the average of the span.
        let avg_rank = (i + 1 + j + 1) as f64 / 2.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }

    let w_plus: f64 = nonzero
        .iter()
        .zip(&ranks)
        .filter(|(d, _)| **d > 0.0)
        .map(|(_, r)| r)
        .sum();

    let m = nonzero.len() as f64;
    let mean_w = m * (m + 1.0) / 4.0;
    let var_w = m * (m + 1.0) * (2.0 * m + 1.0) / 24.0;
    (w_plus - mean_w) / var_w.sqrt()
}

// --- special functions -----------------------------------------------------
// No statistics crate exists in this stack; the three functions below are
// the standard numerical recipes needed for t and normal p-values.

/// Two-tailed p-value of Student's t with `df` degrees of freedom.
fn student_t_two_tailed(t: f64, df: usize) -> f64 {
    let df = df as f64;
    regularized_incomplete_beta(df / 2.0, 0.5, df / (df + t * t))
}

/// Two-tailed p-value of a standard normal statistic.
fn normal_two_tailed(z: f64) -> f64 {
    1.0 - erf(z.abs() / std::f64::consts::SQRT_2)
}

/// Error function, Abramowitz & Stegun 7.1.26 (|error| < 1.5e-7).
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    sign * (1.0 - poly * (-x * x).exp())
}

/// Lanczos approximation of ln Γ(x).
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    let x = x - 1.0;
    let mut acc = COEFFS[0];
    for (i, c) in COEFFS.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    let g = 7.0;
    let t = x + g + 0.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

/// Regularized incomplete beta function I_x(a, b), continued fraction form.
fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b)
        + a * x.ln()
        + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 3.0e-16;
    const FPMIN: f64 = 1.0e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < FPMIN {
        d = FPMIN;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;

        if (del - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_t_statistic_has_unit_p() {
        assert!((student_t_two_tailed(0.0, 10) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn extreme_t_statistic_has_vanishing_p() {
        assert!(student_t_two_tailed(10.0, 10) < 1e-3);
    }

    #[test]
    fn erf_and_normal_tail_sanity() {
        assert_eq!(erf(0.0), 0.0);
        // The 5% two-tailed critical value of the standard normal.
        let p = normal_two_tailed(1.96);
        assert!((p - 0.05).abs() < 2e-3, "p = {p}");
    }

    #[test]
    fn known_paired_t_example() {
        // deltas [1,2,3,4]: mean 2.5, sd ~1.291, t ~3.873, df 3, p ~0.0305.
        let agg = aggregate_metric("curvature", [1.0, 2.0, 3.0, 4.0].into_iter().map(Some));
        assert_eq!(agg.n, 4);
        assert!((agg.mean_delta.unwrap() - 2.5).abs() < 1e-12);
        let test = agg.test.unwrap();
        assert_eq!(test.kind, TestKind::PairedT);
        assert!((test.statistic - 3.8729).abs() < 1e-3);
        assert!(test.p_value > 0.02 && test.p_value < 0.05, "p = {}", test.p_value);
        assert!((test.effect_size - 2.5 / 1.2909944487358056).abs() < 1e-9);
    }

    #[test]
    fn single_pair_reports_point_estimate_only() {
        let agg = aggregate_metric("dfa_alpha", [Some(0.25)].into_iter());
        assert_eq!(agg.n, 1);
        assert_eq!(agg.mean_delta, Some(0.25));
        assert_eq!(agg.std_dev, None);
        assert!(agg.point_estimate_only);
        assert!(matches!(
            agg.test,
            Err(AggregateError::InsufficientSample { actual: 1, .. })
        ));
    }

    #[test]
    fn undefined_deltas_are_excluded_from_n() {
        let agg = aggregate_metric(
            "dfa_alpha",
            [Some(0.1), None, Some(0.3), None].into_iter(),
        );
        assert_eq!(agg.n, 2);
        assert!((agg.mean_delta.unwrap() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn identical_deltas_are_degenerate() {
        let agg = aggregate_metric("entropy_shift", [0.5, 0.5, 0.5].into_iter().map(Some));
        assert_eq!(agg.std_dev, Some(0.0));
        assert!(matches!(
            agg.test,
            Err(AggregateError::DegenerateDeltas { .. })
        ));
    }

    #[test]
    fn aggregation_is_idempotent() {
        let deltas = [0.3, -0.1, 0.7, 0.2, -0.4, 0.5];
        let a = aggregate_metric("mean_velocity", deltas.into_iter().map(Some));
        let b = aggregate_metric("mean_velocity", deltas.into_iter().map(Some));
        assert_eq!(a, b);
    }

    #[test]
    fn wilcoxon_symmetric_deltas_center_at_zero() {
        let z = wilcoxon_signed_rank_z(&[1.0, -1.0, 2.0, -2.0]);
        assert_eq!(z, 0.0);
        assert!((normal_two_tailed(z) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn heavy_tailed_deltas_fall_back_to_rank_test() {
        // One extreme outlier blows the kurtosis screen at n = 9.
        let deltas = [0.1, 0.12, 0.09, 0.11, 0.1, 0.08, 0.13, 0.1, 50.0];
        let agg = aggregate_metric("curvature", deltas.into_iter().map(Some));
        let test = agg.test.unwrap();
        assert_eq!(test.kind, TestKind::WilcoxonSignedRank);
        // Every delta is positive, so the rank test should lean hard positive.
        assert!(test.statistic > 2.0);
        assert!(test.p_value < 0.05);
    }
}
