//! Experiment runner: fans matched pairs out over seeds.
//!
//! Orchestrates the experiment lifecycle:
//! 1. Validate configuration (fatal errors surface before any backend call)
//! 2. Derive the two condition ensembles from the shared agent list
//! 3. Run one matched pair per seed, bounded by the admission semaphore
//! 4. Collect pairs and recompute aggregate statistics

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::info;

use trajectory_kernel::{
    AgentConfig, ConfigError, MetricsConfig, Provocation, SchedulerConfig, TurnScheduler,
};

use crate::backend::{EmbeddingBackend, ModelBackend, RetryPolicy};
use crate::pair::PairRunner;
use crate::results::{ExperimentConfig, ExperimentResult};
use crate::runner::{CancelToken, SessionRunner};
use crate::vllm_client::{VllmClient, VllmEmbeddingBackend, VllmModelBackend};

/// One agent as configured by the caller: the per-condition backend
/// assignment is derived, everything else is shared.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub agent_id: String,
    pub persona: String,
    pub temperature: f32,
}

/// Configuration for the experiment runner.
#[derive(Debug, Clone)]
pub struct ExperimentRunnerConfig {
    /// vLLM host URL serving chat completions.
    pub vllm_host: String,
    /// Host serving the embedding endpoint (often the same server).
    pub embedding_host: String,
    /// Embedding model name.
    pub embedding_model: String,
    /// Model serving every agent in the single condition.
    pub single_model: String,
    /// Models assigned round-robin across agents in the multi condition.
    pub multi_models: Vec<String>,
    /// The shared agent ensemble (identities, personas, temperatures).
    pub agents: Vec<AgentSpec>,
    /// Turn budget per session.
    pub max_turns: usize,
    /// Maximum concurrent backend requests across all sessions and pairs.
    pub max_concurrent_llm: usize,
    /// Scheduler tunables (frequency window, fixed opening agent).
    pub scheduler: SchedulerConfig,
    /// Metrics tunables (DFA windows, entropy clusters).
    pub metrics: MetricsConfig,
    /// Bounded retry policy around backend calls.
    pub retry: RetryPolicy,
}

impl Default for ExperimentRunnerConfig {
    fn default() -> Self {
        Self {
            vllm_host: "http://localhost:8000".to_string(),
            embedding_host: "http://localhost:8000".to_string(),
            embedding_model: "BAAI/bge-small-en-v1.5".to_string(),
            single_model: "Qwen/Qwen2.5-1.5B".to_string(),
            multi_models: vec![
                "Qwen/Qwen2.5-0.5B".to_string(),
                "Qwen/Qwen2.5-1.5B".to_string(),
                "Qwen/Qwen2.5-3B".to_string(),
            ],
            agents: default_agents(),
            max_turns: 21,
            max_concurrent_llm: 8, // GPU handles 8-16 concurrent calls well
            scheduler: SchedulerConfig::default(),
            metrics: MetricsConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Role handles for the standard ensemble. Personas are opaque to the
/// engine; the model backend resolves them.
const DEFAULT_ROLES: [&str; 7] = [
    "analyst",
    "skeptic",
    "dreamer",
    "historian",
    "engineer",
    "poet",
    "moderator",
];

/// Build an ensemble of `count` agents over the standard role handles,
/// cycling when `count` exceeds the roster.
pub fn agent_roster(count: usize) -> Vec<AgentSpec> {
    (0..count)
        .map(|i| AgentSpec {
            agent_id: format!("a{i}"),
            persona: DEFAULT_ROLES[i % DEFAULT_ROLES.len()].to_string(),
            temperature: 0.7,
        })
        .collect()
}

fn default_agents() -> Vec<AgentSpec> {
    agent_roster(DEFAULT_ROLES.len())
}

impl ExperimentRunnerConfig {
    /// Ensemble for the single-model condition.
    pub fn single_ensemble(&self) -> Vec<AgentConfig> {
        self.agents
            .iter()
            .map(|a| AgentConfig {
                agent_id: a.agent_id.clone(),
                persona: a.persona.clone(),
                backend_id: self.single_model.clone(),
                temperature: a.temperature,
            })
            .collect()
    }

    /// Ensemble for the multi-model condition: models spread round-robin.
    pub fn multi_ensemble(&self) -> Vec<AgentConfig> {
        self.agents
            .iter()
            .enumerate()
            .map(|(i, a)| AgentConfig {
                agent_id: a.agent_id.clone(),
                persona: a.persona.clone(),
                backend_id: self.multi_models[i % self.multi_models.len()].clone(),
                temperature: a.temperature,
            })
            .collect()
    }

    /// Fatal configuration checks, run before any backend call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agents.is_empty() || self.multi_models.is_empty() {
            return Err(ConfigError::EmptyEnsemble(
                trajectory_kernel::EmptyEnsembleError,
            ));
        }
        if let Some(opener) = &self.scheduler.fixed_opening_agent {
            if !self.agents.iter().any(|a| &a.agent_id == opener) {
                return Err(ConfigError::UnknownOpeningAgent {
                    agent_id: opener.clone(),
                });
            }
        }
        Ok(())
    }

    /// Echo stored alongside results.
    fn echo(&self, seeds: &[u64]) -> ExperimentConfig {
        ExperimentConfig {
            single_model: self.single_model.clone(),
            multi_models: self.multi_models.clone(),
            embedding_model: self.embedding_model.clone(),
            agent_count: self.agents.len(),
            max_turns: self.max_turns,
            seeds: seeds.to_vec(),
            fixed_opening_agent: self.scheduler.fixed_opening_agent.clone(),
        }
    }
}

/// The experiment runner.
pub struct ExperimentRunner {
    config: ExperimentRunnerConfig,
    model: Arc<dyn ModelBackend>,
    embedder: Arc<dyn EmbeddingBackend>,
}

impl ExperimentRunner {
    /// Create a runner backed by vLLM endpoints from the configuration.
    pub fn new(config: ExperimentRunnerConfig) -> Self {
        let model = Arc::new(VllmModelBackend::new(VllmClient::new(&config.vllm_host)));
        let embedder = Arc::new(VllmEmbeddingBackend::new(
            VllmClient::new(&config.embedding_host),
            config.embedding_model.clone(),
        ));
        Self::with_backends(config, model, embedder)
    }

    /// Create a runner with explicit backends (deterministic in tests).
    pub fn with_backends(
        config: ExperimentRunnerConfig,
        model: Arc<dyn ModelBackend>,
        embedder: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        Self {
            config,
            model,
            embedder,
        }
    }

    /// Run one matched pair per seed and aggregate the results.
    ///
    /// Pairs are independent and run concurrently; the shared semaphore
    /// bounds outstanding backend calls across all of them. Configuration
    /// errors are fatal; backend failures degrade individual sessions and
    /// are carried inside the returned result.
    pub async fn run(
        &self,
        provocation: &Provocation,
        seeds: &[u64],
        cancel: Option<CancelToken>,
    ) -> Result<ExperimentResult, ConfigError> {
        self.config.validate()?;

        let single_ensemble = self.config.single_ensemble();
        let multi_ensemble = self.config.multi_ensemble();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_llm.max(1)));

        info!(
            provocation = %provocation.id,
            pairs = seeds.len(),
            agents = self.config.agents.len(),
            max_turns = self.config.max_turns,
            "Starting experiment"
        );

        let mut result = ExperimentResult::new(self.config.echo(seeds));
        result.started_at = Utc::now();

        let pair_futures = seeds.iter().map(|&seed| {
            let pair_runner = PairRunner::new(
                SessionRunner::new(
                    self.model.clone(),
                    self.embedder.clone(),
                    TurnScheduler::new(self.config.scheduler.clone()),
                    self.config.retry.clone(),
                    semaphore.clone(),
                ),
                self.config.metrics.clone(),
            );
            let single = single_ensemble.clone();
            let multi = multi_ensemble.clone();
            let cancel = cancel.clone();
            async move {
                pair_runner
                    .run_pair(
                        provocation,
                        seed,
                        &single,
                        &multi,
                        self.config.max_turns,
                        cancel,
                    )
                    .await
            }
        });

        for pair in join_all(pair_futures).await {
            result.add(pair?);
        }

        result.ended_at = Utc::now();
        result.compute_stats();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_ensemble_spreads_models_round_robin() {
        let config = ExperimentRunnerConfig::default();
        let multi = config.multi_ensemble();
        assert_eq!(multi.len(), 7);
        assert_eq!(multi[0].backend_id, config.multi_models[0]);
        assert_eq!(multi[1].backend_id, config.multi_models[1]);
        assert_eq!(multi[3].backend_id, config.multi_models[0]);
    }

    #[test]
    fn single_ensemble_uses_one_model_everywhere() {
        let config = ExperimentRunnerConfig::default();
        assert!(config
            .single_ensemble()
            .iter()
            .all(|a| a.backend_id == config.single_model));
    }

    #[test]
    fn conditions_share_composition() {
        let config = ExperimentRunnerConfig::default();
        let single = config.single_ensemble();
        let multi = config.multi_ensemble();
        assert!(crate::pair::validate_pair_composition(&single, &multi).is_ok());
    }

    #[test]
    fn unknown_opener_is_rejected_up_front() {
        let config = ExperimentRunnerConfig {
            scheduler: SchedulerConfig {
                fixed_opening_agent: Some("nobody".to_string()),
                ..SchedulerConfig::default()
            },
            ..ExperimentRunnerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownOpeningAgent { .. })
        ));
    }
}
