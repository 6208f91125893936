//! Configuration constants for scheduling and metrics.
//!
//! Both the scheduler's frequency window and the DFA window progression are
//! documented tunables: the defaults below are the values experiments run
//! with unless a caller overrides them.

use serde::{Deserialize, Serialize};

/// How many trailing turns the scheduler counts when weighting speakers.
pub const DEFAULT_FREQUENCY_WINDOW: usize = 8;

/// Smallest DFA window size.
pub const DEFAULT_DFA_MIN_WINDOW: usize = 4;

/// Ratio between consecutive DFA window sizes.
pub const DEFAULT_DFA_WINDOW_RATIO: f64 = 1.5;

/// Number of clusters used to discretize embeddings for the entropy shift.
pub const DEFAULT_ENTROPY_CLUSTERS: usize = 5;

/// Iteration cap for the deterministic k-means pass.
pub const DEFAULT_KMEANS_MAX_ITERS: usize = 32;

/// Turn-scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Trailing window (in turns) over which speaking frequency is counted.
    pub frequency_window: usize,

    /// Agent that deterministically opens the dialogue at turn 0.
    /// `None` means turn 0 is drawn like any other turn.
    pub fixed_opening_agent: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frequency_window: DEFAULT_FREQUENCY_WINDOW,
            fixed_opening_agent: None,
        }
    }
}

/// Metrics-engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Smallest DFA window size (lower bound of the progression).
    pub dfa_min_window: usize,

    /// Geometric ratio between consecutive DFA window sizes.
    pub dfa_window_ratio: f64,

    /// Explicit DFA window sizes. When set, replaces the geometric
    /// progression; sizes outside `[dfa_min_window, len/4]` are discarded.
    pub dfa_windows: Option<Vec<usize>>,

    /// Number of clusters for the entropy-shift discretization.
    pub entropy_clusters: usize,

    /// Iteration cap for the deterministic k-means pass.
    pub kmeans_max_iters: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            dfa_min_window: DEFAULT_DFA_MIN_WINDOW,
            dfa_window_ratio: DEFAULT_DFA_WINDOW_RATIO,
            dfa_windows: None,
            entropy_clusters: DEFAULT_ENTROPY_CLUSTERS,
            kmeans_max_iters: DEFAULT_KMEANS_MAX_ITERS,
        }
    }
}
