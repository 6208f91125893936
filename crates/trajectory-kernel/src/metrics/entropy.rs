//! Entropy shift: change in cluster-occupancy spread between session halves.
//!
//! Embeddings are discretized by a deterministic k-means pass seeded through
//! the RNG service at the reserved cluster stream, so recomputation from
//! persisted data reproduces the original assignments exactly.

use rand::seq::index::sample;

use crate::config::MetricsConfig;
use crate::error::MetricError;
use crate::metrics::MetricResult;
use crate::rng::{rng_for, CLUSTER_STREAM};

const METRIC: &str = "entropy_shift";

/// ΔH = entropy(second half) − entropy(first half), in bits.
///
/// Requires at least 4 turns so each half holds at least 2. The cluster
/// count is capped at the number of points.
pub fn entropy_shift(embeddings: &[&[f32]], seed: u64, config: &MetricsConfig) -> MetricResult {
    let n = embeddings.len();
    if n < 4 {
        return Err(MetricError::insufficient(METRIC, 4, n));
    }

    let k = config.entropy_clusters.max(1).min(n);
    let assignments = cluster_assignments(embeddings, k, seed, config.kmeans_max_iters);

    let half = n / 2;
    let first = shannon_entropy(&assignments[..half], k);
    let second = shannon_entropy(&assignments[half..], k);
    Ok(second - first)
}

/// Deterministic Lloyd k-means: centroids initialized from a seeded sample
/// of the points, squared-euclidean assignment, empty clusters keep their
/// previous centroid. Ties break toward the lowest centroid index.
fn cluster_assignments(
    embeddings: &[&[f32]],
    k: usize,
    seed: u64,
    max_iters: usize,
) -> Vec<usize> {
    let n = embeddings.len();
    let mut rng = rng_for(seed, CLUSTER_STREAM);

    let mut centroids: Vec<Vec<f64>> = sample(&mut rng, n, k)
        .iter()
        .map(|i| to_f64(embeddings[i]))
        .collect();
    let mut assignments = vec![0usize; n];

    for _ in 0..max_iters {
        let mut changed = false;
        for (i, point) in embeddings.iter().enumerate() {
            let nearest = nearest_centroid(point, &centroids);
            if assignments[i] != nearest {
                assignments[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&[f32]> = embeddings
                .iter()
                .zip(&assignments)
                .filter(|(_, &a)| a == c)
                .map(|(e, _)| *e)
                .collect();
            if members.is_empty() {
                continue;
            }
            for value in centroid.iter_mut() {
                *value = 0.0;
            }
            for member in &members {
                for (acc, x) in centroid.iter_mut().zip(member.iter()) {
                    *acc += f64::from(*x);
                }
            }
            for value in centroid.iter_mut() {
                *value /= members.len() as f64;
            }
        }
    }
    assignments
}

fn to_f64(v: &[f32]) -> Vec<f64> {
    v.iter().map(|x| f64::from(*x)).collect()
}

fn nearest_centroid(point: &[f32], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (c, centroid) in centroids.iter().enumerate() {
        let dist: f64 = centroid
            .iter()
            .zip(point.iter())
            .map(|(a, b)| {
                let d = a - f64::from(*b);
                d * d
            })
            .sum();
        if dist < best_dist {
            best_dist = dist;
            best = c;
        }
    }
    best
}

/// Shannon entropy (bits) of the cluster-occupancy distribution.
fn shannon_entropy(assignments: &[usize], k: usize) -> f64 {
    let mut counts = vec![0usize; k];
    for &a in assignments {
        counts[a] += 1;
    }
    let total = assignments.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(vecs: &[Vec<f32>]) -> Vec<&[f32]> {
        vecs.iter().map(|v| v.as_slice()).collect()
    }

    #[test]
    fn uniform_occupancy_has_maximal_entropy() {
        assert_eq!(shannon_entropy(&[0, 0, 1, 1], 2), 1.0);
        assert_eq!(shannon_entropy(&[0, 0, 0, 0], 2), 0.0);
    }

    #[test]
    fn fewer_than_four_turns_is_insufficient() {
        let e = vec![vec![0.0f32, 0.0]; 3];
        let err = entropy_shift(&owned(&e), 42, &MetricsConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            MetricError::InsufficientData { needed: 4, .. }
        ));
    }

    #[test]
    fn spread_increase_yields_positive_shift() {
        // First half: one repeated point. Second half: four mutually distant
        // points. With k = n every distinct point is its own centroid and
        // identical points tie to the same one, so the assignment is exact:
        // H(first) = 0 bits, H(second) = 2 bits.
        let e = vec![
            vec![0.0f32, 0.0],
            vec![0.0, 0.0],
            vec![0.0, 0.0],
            vec![0.0, 0.0],
            vec![10.0, 0.0],
            vec![0.0, 10.0],
            vec![-10.0, 0.0],
            vec![0.0, -10.0],
        ];
        let config = MetricsConfig {
            entropy_clusters: 8,
            ..MetricsConfig::default()
        };
        let shift = entropy_shift(&owned(&e), 42, &config).unwrap();
        assert!((shift - 2.0).abs() < 1e-9, "shift = {shift}");
    }

    #[test]
    fn shift_is_deterministic_for_fixed_seed() {
        let e: Vec<Vec<f32>> = (0..12)
            .map(|i| vec![(i as f32).sin(), (i as f32).cos(), i as f32 * 0.1])
            .collect();
        let a = entropy_shift(&owned(&e), 42, &MetricsConfig::default()).unwrap();
        let b = entropy_shift(&owned(&e), 42, &MetricsConfig::default()).unwrap();
        assert_eq!(a, b);
    }
}
