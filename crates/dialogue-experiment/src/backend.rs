//! Backend contracts: model generation and embedding capture.
//!
//! Trait-based so production code talks to a vLLM server while tests use
//! deterministic in-process backends. Failures are typed: the session runner
//! maps them onto bounded retry and, on exhaustion, an early-sealed session.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use trajectory_kernel::DialogueContext;

/// A single backend call failure. Session-local after retry exhaustion;
/// never fatal to the experiment.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("request timed out")]
    Timeout,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("empty utterance")]
    EmptyUtterance,

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Produces an agent's next utterance given its persona, assigned backend,
/// sampling temperature, and the visible conversation.
///
/// Must be invocable per (agent, turn) independently; the runner serializes
/// calls within a session and the admission semaphore bounds them globally.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(
        &self,
        persona: &str,
        backend_id: &str,
        temperature: f32,
        context: &DialogueContext<'_>,
    ) -> Result<String, BackendError>;
}

/// Maps an utterance to a fixed-dimension vector. Dimensionality must be
/// constant across all calls within one experiment; the runner treats a
/// mismatch as a fatal configuration error.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;
}

/// Bounded retry with exponential backoff around backend calls.
///
/// Explicit max attempts and a typed terminal failure; no open-ended retry
/// loops.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: usize,
    /// Delay before the first retry; doubles per subsequent retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: usize) -> Duration {
        self.base_delay.saturating_mul(1u32 << retry.min(16) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
    }

    #[test]
    fn backoff_exponent_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 64,
            base_delay: Duration::from_millis(1),
        };
        // Shift stays within u32 range even for absurd retry counts.
        assert!(policy.delay_for(100) >= policy.delay_for(16));
    }
}
