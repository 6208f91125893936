//! Matched-pair runner: one seed, one provocation, two conditions.
//!
//! Both sessions run with identical seed, provocation and turn budget, and
//! with ensembles that differ *only* in backend assignment, validated up
//! front. Because the scheduler is a pure function of (ensemble identities,
//! history, turn index, seed), the two conditions receive the same speaker
//! sequence, isolating the backend-diversity effect from scheduling
//! variance.

use serde::{Deserialize, Serialize};
use tracing::info;

use trajectory_kernel::{
    AgentConfig, Condition, ConfigError, MetricSet, MetricsConfig, Provocation, Session,
};

use crate::runner::{CancelToken, SessionRunner, SessionSpec};

/// Field-wise metric deltas, `multi − single`, defined only where both
/// sides are defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDeltas {
    pub mean_velocity: Option<f64>,
    pub curvature: Option<f64>,
    pub dfa_alpha: Option<f64>,
    pub entropy_shift: Option<f64>,
}

impl MetricDeltas {
    pub fn between(single: &MetricSet, multi: &MetricSet) -> Self {
        fn diff(
            single: &trajectory_kernel::MetricResult,
            multi: &trajectory_kernel::MetricResult,
        ) -> Option<f64> {
            match (single, multi) {
                (Ok(s), Ok(m)) => Some(m - s),
                _ => None,
            }
        }
        Self {
            mean_velocity: diff(&single.mean_velocity, &multi.mean_velocity),
            curvature: diff(&single.curvature, &multi.curvature),
            dfa_alpha: diff(&single.dfa_alpha, &multi.dfa_alpha),
            entropy_shift: diff(&single.entropy_shift, &multi.entropy_shift),
        }
    }
}

/// One matched pair: both sessions, both metric sets, and their deltas.
/// Owns its sessions; immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairResult {
    pub provocation_id: String,
    pub seed: u64,
    pub single_session: Session,
    pub multi_session: Session,
    pub single_metrics: MetricSet,
    pub multi_metrics: MetricSet,
    pub deltas: MetricDeltas,
}

impl PairResult {
    /// Rebuild both metric sets and the deltas from the stored sessions.
    /// Pure recomputation; no backend involved.
    pub fn recompute_metrics(&mut self, config: &MetricsConfig) {
        self.single_metrics = MetricSet::compute(&self.single_session, config);
        self.multi_metrics = MetricSet::compute(&self.multi_session, config);
        self.deltas = MetricDeltas::between(&self.single_metrics, &self.multi_metrics);
    }
}

/// Runs the two conditions of a pair and compares their trajectories.
pub struct PairRunner {
    sessions: SessionRunner,
    metrics: MetricsConfig,
}

impl PairRunner {
    pub fn new(sessions: SessionRunner, metrics: MetricsConfig) -> Self {
        Self { sessions, metrics }
    }

    /// Run both conditions under an identical seed and provocation.
    ///
    /// The two sessions share no mutable state and run concurrently; the
    /// shared admission semaphore bounds their backend calls.
    pub async fn run_pair(
        &self,
        provocation: &Provocation,
        seed: u64,
        single_ensemble: &[AgentConfig],
        multi_ensemble: &[AgentConfig],
        max_turns: usize,
        cancel: Option<CancelToken>,
    ) -> Result<PairResult, ConfigError> {
        validate_pair_composition(single_ensemble, multi_ensemble)?;

        let single_spec = SessionSpec {
            provocation,
            ensemble: single_ensemble,
            condition: Condition::Single,
            seed,
            max_turns,
        };
        let multi_spec = SessionSpec {
            provocation,
            ensemble: multi_ensemble,
            condition: Condition::Multi,
            seed,
            max_turns,
        };

        let (single_session, multi_session) = tokio::join!(
            self.sessions.run_session(single_spec, cancel.clone()),
            self.sessions.run_session(multi_spec, cancel),
        );
        let single_session = single_session?;
        let multi_session = multi_session?;

        let single_metrics = MetricSet::compute(&single_session, &self.metrics);
        let multi_metrics = MetricSet::compute(&multi_session, &self.metrics);
        let deltas = MetricDeltas::between(&single_metrics, &multi_metrics);

        info!(
            provocation = %provocation.id,
            seed,
            single_turns = single_session.turns.len(),
            multi_turns = multi_session.turns.len(),
            "Completed matched pair"
        );

        Ok(PairResult {
            provocation_id: provocation.id.clone(),
            seed,
            single_session,
            multi_session,
            single_metrics,
            multi_metrics,
            deltas,
        })
    }
}

/// The two conditions must share agent identities, ordering, personas and
/// temperatures; only `backend_id` may differ.
pub fn validate_pair_composition(
    single: &[AgentConfig],
    multi: &[AgentConfig],
) -> Result<(), ConfigError> {
    if single.is_empty() {
        return Err(ConfigError::EmptyEnsemble(
            trajectory_kernel::EmptyEnsembleError,
        ));
    }
    if single.len() != multi.len() {
        return Err(ConfigError::EnsembleMismatch {
            detail: format!(
                "single has {} agents, multi has {}",
                single.len(),
                multi.len()
            ),
        });
    }
    for (i, (s, m)) in single.iter().zip(multi.iter()).enumerate() {
        if s.agent_id != m.agent_id {
            return Err(ConfigError::EnsembleMismatch {
                detail: format!(
                    "agent {} differs in identity: {:?} vs {:?}",
                    i, s.agent_id, m.agent_id
                ),
            });
        }
        if s.persona != m.persona {
            return Err(ConfigError::EnsembleMismatch {
                detail: format!("agent {:?} differs in persona", s.agent_id),
            });
        }
        if s.temperature != m.temperature {
            return Err(ConfigError::EnsembleMismatch {
                detail: format!(
                    "agent {:?} differs in temperature: {} vs {}",
                    s.agent_id, s.temperature, m.temperature
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trajectory_kernel::MetricError;

    fn agent(id: &str, backend: &str) -> AgentConfig {
        AgentConfig {
            agent_id: id.to_string(),
            persona: format!("{id} persona"),
            backend_id: backend.to_string(),
            temperature: 0.7,
        }
    }

    #[test]
    fn composition_validation_allows_backend_divergence() {
        let single = vec![agent("a0", "m"), agent("a1", "m")];
        let multi = vec![agent("a0", "x"), agent("a1", "y")];
        assert!(validate_pair_composition(&single, &multi).is_ok());
    }

    #[test]
    fn composition_validation_rejects_identity_drift() {
        let single = vec![agent("a0", "m"), agent("a1", "m")];
        let multi = vec![agent("a0", "x"), agent("a2", "y")];
        assert!(matches!(
            validate_pair_composition(&single, &multi),
            Err(ConfigError::EnsembleMismatch { .. })
        ));
    }

    #[test]
    fn composition_validation_rejects_empty() {
        assert!(matches!(
            validate_pair_composition(&[], &[]),
            Err(ConfigError::EmptyEnsemble(_))
        ));
    }

    #[test]
    fn deltas_are_field_wise_and_respect_undefined_sides() {
        let defined = MetricSet {
            mean_velocity: Ok(0.4),
            curvature: Ok(2.0),
            dfa_alpha: Ok(0.6),
            entropy_shift: Ok(0.1),
        };
        let partial = MetricSet {
            mean_velocity: Ok(0.9),
            curvature: Ok(3.5),
            dfa_alpha: Err(MetricError::insufficient("dfa_alpha", 56, 20)),
            entropy_shift: Ok(0.3),
        };
        let deltas = MetricDeltas::between(&defined, &partial);
        assert_eq!(deltas.mean_velocity, Some(0.5));
        assert_eq!(deltas.curvature, Some(1.5));
        assert_eq!(deltas.dfa_alpha, None);
        assert!((deltas.entropy_shift.unwrap() - 0.2).abs() < 1e-12);
    }
}
