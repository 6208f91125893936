//! Semantic-trajectory metrics over a session's embedding sequence.
//!
//! Four metrics are computed independently: mean velocity (cosine step
//! distance), curvature (cumulative angular deviation of the displacement
//! path), the DFA long-range correlation exponent over the velocity series,
//! and the entropy shift of cluster occupancy between session halves. A
//! failure in one metric never blocks the others; each undefined field
//! carries its reason.

pub mod dfa;
pub mod entropy;

use serde::{Deserialize, Serialize};

use crate::config::MetricsConfig;
use crate::error::MetricError;
use crate::session::Session;

/// A single metric value, or the explicit reason it is undefined.
pub type MetricResult = Result<f64, MetricError>;

/// The four trajectory metrics for one sealed session. Derived data,
/// never mutated once computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    pub mean_velocity: MetricResult,
    pub curvature: MetricResult,
    pub dfa_alpha: MetricResult,
    pub entropy_shift: MetricResult,
}

impl MetricSet {
    /// Compute all metrics for a sealed session.
    pub fn compute(session: &Session, config: &MetricsConfig) -> Self {
        Self::from_embeddings(&session.embeddings(), session.seed, config)
    }

    /// Compute all metrics from a raw embedding sequence.
    ///
    /// `seed` feeds the deterministic clustering pass for the entropy shift;
    /// it is the session seed, so recomputing from persisted data reproduces
    /// the original values exactly.
    pub fn from_embeddings(embeddings: &[&[f32]], seed: u64, config: &MetricsConfig) -> Self {
        let velocities = velocity_series(embeddings);
        Self {
            mean_velocity: mean_velocity(embeddings),
            curvature: curvature(embeddings),
            dfa_alpha: dfa::dfa_alpha(&velocities, config),
            entropy_shift: entropy::entropy_shift(embeddings, seed, config),
        }
    }
}

/// Cosine distance `1 - cos(a, b)`.
///
/// A zero-norm operand yields similarity 0 and therefore distance 1.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Per-turn step distances `v_i = distance(e_i, e_{i-1})`, length `n - 1`.
pub fn velocity_series(embeddings: &[&[f32]]) -> Vec<f64> {
    embeddings
        .windows(2)
        .map(|pair| cosine_distance(pair[0], pair[1]))
        .collect()
}

fn mean_velocity(embeddings: &[&[f32]]) -> MetricResult {
    let n = embeddings.len();
    if n < 2 {
        return Err(MetricError::insufficient("mean_velocity", 2, n));
    }
    let velocities = velocity_series(embeddings);
    Ok(velocities.iter().sum::<f64>() / velocities.len() as f64)
}

/// Cumulative angular deviation between consecutive displacement vectors.
///
/// Each angle comes from `arccos` of the normalized dot product, clamped to
/// `[-1, 1]` against floating-point drift. Zero-norm displacements
/// contribute zero angle. A 3-turn session (a single displacement pair) is
/// below the validity threshold and reports insufficient data.
fn curvature(embeddings: &[&[f32]]) -> MetricResult {
    let n = embeddings.len();
    if n < 4 {
        return Err(MetricError::insufficient("curvature", 4, n));
    }

    let displacements: Vec<Vec<f64>> = embeddings
        .windows(2)
        .map(|pair| {
            pair[1]
                .iter()
                .zip(pair[0].iter())
                .map(|(b, a)| f64::from(*b) - f64::from(*a))
                .collect()
        })
        .collect();

    let mut total = 0.0;
    for pair in displacements.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let dot: f64 = prev.iter().zip(next.iter()).map(|(a, b)| a * b).sum();
        let norm_prev: f64 = prev.iter().map(|x| x * x).sum::<f64>().sqrt();
        let norm_next: f64 = next.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm_prev == 0.0 || norm_next == 0.0 {
            continue;
        }
        total += (dot / (norm_prev * norm_next)).clamp(-1.0, 1.0).acos();
    }
    Ok(total)
}
