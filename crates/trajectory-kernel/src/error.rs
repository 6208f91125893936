//! Error taxonomy for the deterministic core.
//!
//! Configuration errors are fatal and surface before any backend call.
//! Metric errors are metric-local: one undefined metric never blocks the
//! others, and the reason travels with the result it degraded.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scheduling over an empty ensemble is impossible. Fatal, configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("ensemble is empty; scheduling requires at least one agent")]
pub struct EmptyEnsembleError;

/// Fatal configuration errors, reported to the caller before (or instead of)
/// producing a result. Backend failures are *not* configuration errors; they
/// degrade the enclosing session and are recorded there.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error(transparent)]
    EmptyEnsemble(#[from] EmptyEnsembleError),

    /// The two conditions of a pair must share agent identities, ordering,
    /// personas and temperatures; only backend assignment may differ.
    #[error("ensemble composition differs between conditions: {detail}")]
    EnsembleMismatch { detail: String },

    /// All embeddings within one experiment must share a dimensionality.
    #[error(
        "embedding dimension mismatch at turn {turn_index}: expected {expected}, got {actual}"
    )]
    EmbeddingDimensionMismatch {
        expected: usize,
        actual: usize,
        turn_index: usize,
    },

    /// A configured fixed opening agent must be a member of the ensemble.
    #[error("fixed opening agent {agent_id:?} is not in the ensemble")]
    UnknownOpeningAgent { agent_id: String },
}

/// Why a single metric is undefined for a session.
///
/// Carried inside the `MetricSet` field it applies to, so partial results
/// stay inspectable and serializable.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricError {
    /// The series is too short for this metric's minimum data requirement.
    /// Counts are in the metric's own units: turns for velocity, curvature
    /// and entropy shift; velocity-series points for the DFA exponent.
    #[error("{metric} requires at least {needed} data points, have {actual}")]
    InsufficientData {
        metric: String,
        needed: usize,
        actual: usize,
    },

    /// The series is long enough but carries no usable fluctuation
    /// (e.g. a variance-free velocity series under DFA).
    #[error("{metric} is undefined for a degenerate series: {reason}")]
    Degenerate { metric: String, reason: String },
}

impl MetricError {
    pub fn insufficient(metric: &str, needed: usize, actual: usize) -> Self {
        Self::InsufficientData {
            metric: metric.to_string(),
            needed,
            actual,
        }
    }

    pub fn degenerate(metric: &str, reason: impl Into<String>) -> Self {
        Self::Degenerate {
            metric: metric.to_string(),
            reason: reason.into(),
        }
    }
}
