//! Result collection and persistence.
//!
//! An `ExperimentResult` owns its pairs and carries aggregate statistics
//! that are only ever produced by a full recompute over the current pair
//! collection; adding a pair invalidates them. The serialized form keeps
//! every turn with its embedding, so metrics and statistics can be rebuilt
//! offline without re-invoking either backend.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use trajectory_kernel::MetricsConfig;

use crate::aggregate::{aggregate, ExperimentStats};
use crate::pair::PairResult;

/// Configuration echo stored alongside results, so a saved file is
/// self-describing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Model serving every agent in the single condition.
    pub single_model: String,
    /// Models spread across agents in the multi condition.
    pub multi_models: Vec<String>,
    /// Embedding model used for trajectory capture.
    pub embedding_model: String,
    /// Number of agents in the ensemble.
    pub agent_count: usize,
    /// Turn budget per session.
    pub max_turns: usize,
    /// Seeds, one per pair.
    pub seeds: Vec<u64>,
    /// Agent that deterministically opens every dialogue, if configured.
    pub fixed_opening_agent: Option<String>,
}

/// Results from a full experiment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub run_id: Uuid,
    pub config: ExperimentConfig,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// All matched pairs, in seed order.
    pub pairs: Vec<PairResult>,
    /// Aggregate statistics; `None` until computed, and reset whenever the
    /// pair collection changes.
    pub stats: Option<ExperimentStats>,
}

impl ExperimentResult {
    pub fn new(config: ExperimentConfig) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            config,
            started_at: now,
            ended_at: now,
            pairs: Vec::new(),
            stats: None,
        }
    }

    /// Add a pair. Any previously computed statistics are invalidated so
    /// they can only be recomputed from the full collection.
    pub fn add(&mut self, pair: PairResult) {
        self.pairs.push(pair);
        self.stats = None;
    }

    /// Recompute aggregate statistics from the current pair collection.
    pub fn compute_stats(&mut self) -> &ExperimentStats {
        self.stats = Some(aggregate(&self.pairs));
        self.stats.as_ref().expect("stats just computed")
    }

    /// Rebuild every pair's metrics and deltas from the stored sessions,
    /// then the aggregate statistics. No backend calls are involved.
    pub fn recompute_metrics(&mut self, config: &MetricsConfig) {
        for pair in &mut self.pairs {
            pair.recompute_metrics(config);
        }
        self.compute_stats();
    }

    /// Save results to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load results from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let results = serde_json::from_str(&json)?;
        Ok(results)
    }
}
