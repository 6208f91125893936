//! Dialogue session runner: drives one condition's full dialogue.
//!
//! Turns are strictly sequential: each turn's visible context includes all
//! prior turns, so turn i+1 cannot start before turn i's utterance and
//! embedding are sealed. Backend calls are the only suspension points; they
//! pass through the shared admission semaphore and a bounded retry policy.
//! On retry exhaustion the session is sealed early with its partial turns
//! preserved; a cancelled session is sealed the same way. A backend call
//! that completes concurrently with cancellation still records its turn;
//! cancellation takes effect at the next suspension point or loop boundary.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use trajectory_kernel::{
    AgentConfig, Condition, ConfigError, DialogueContext, Provocation, Session, SessionAbort,
    TerminalReason, Turn, TurnScheduler,
};

use crate::backend::{BackendError, EmbeddingBackend, ModelBackend, RetryPolicy};

/// Everything one `run_session` call needs.
#[derive(Debug, Clone, Copy)]
pub struct SessionSpec<'a> {
    pub provocation: &'a Provocation,
    pub ensemble: &'a [AgentConfig],
    pub condition: Condition,
    pub seed: u64,
    pub max_turns: usize,
}

/// Optional caller-held cancel signal. Flipping the sender to `true` seals
/// the session at its next suspension point, keeping all recorded turns.
pub type CancelToken = watch::Receiver<bool>;

enum CallFailure {
    Cancelled,
    Exhausted { attempts: usize, last: BackendError },
}

/// Runs one full session per call; holds no cross-call state.
pub struct SessionRunner {
    model: Arc<dyn ModelBackend>,
    embedder: Arc<dyn EmbeddingBackend>,
    scheduler: TurnScheduler,
    retry: RetryPolicy,
    llm_semaphore: Arc<Semaphore>,
}

impl SessionRunner {
    pub fn new(
        model: Arc<dyn ModelBackend>,
        embedder: Arc<dyn EmbeddingBackend>,
        scheduler: TurnScheduler,
        retry: RetryPolicy,
        llm_semaphore: Arc<Semaphore>,
    ) -> Self {
        Self {
            model,
            embedder,
            scheduler,
            retry,
            llm_semaphore,
        }
    }

    /// Drive one condition's dialogue to completion.
    ///
    /// Configuration errors (empty ensemble, embedding-dimension mismatch)
    /// are fatal and returned as `Err`. Backend failures degrade the session
    /// instead: it is sealed early with `TerminalReason::Aborted` and still
    /// returned, so partial data stays inspectable.
    pub async fn run_session(
        &self,
        spec: SessionSpec<'_>,
        cancel: Option<CancelToken>,
    ) -> Result<Session, ConfigError> {
        if spec.ensemble.is_empty() {
            return Err(ConfigError::EmptyEnsemble(
                trajectory_kernel::EmptyEnsembleError,
            ));
        }

        let started_at = Utc::now();
        let mut cancel = cancel;
        let mut turns: Vec<Turn> = Vec::with_capacity(spec.max_turns);
        let mut expected_dim: Option<usize> = None;
        let mut terminal = TerminalReason::MaxTurnsReached;

        for turn_index in 0..spec.max_turns {
            if is_cancelled(&cancel) {
                terminal = TerminalReason::Aborted(SessionAbort::Cancelled { turn_index });
                break;
            }

            let agent = self
                .scheduler
                .pick_speaker(spec.ensemble, &turns, turn_index, spec.seed)
                .map_err(ConfigError::from)?;

            let turn_started = Instant::now();
            let context = DialogueContext {
                provocation: &spec.provocation.text,
                turns: &turns,
            };

            let text = match self.generate_with_retry(agent, &context, &mut cancel).await {
                Ok(text) => text,
                Err(CallFailure::Cancelled) => {
                    terminal = TerminalReason::Aborted(SessionAbort::Cancelled { turn_index });
                    break;
                }
                Err(CallFailure::Exhausted { attempts, last }) => {
                    let abort = SessionAbort::AgentInvocation {
                        agent_id: agent.agent_id.clone(),
                        turn_index,
                        attempts,
                        message: last.to_string(),
                    };
                    warn!(
                        condition = %spec.condition,
                        agent = %agent.agent_id,
                        turn = turn_index,
                        error = %abort,
                        "Sealing session early: model backend exhausted retries"
                    );
                    terminal = TerminalReason::Aborted(abort);
                    break;
                }
            };

            let embedding = match self.embed_with_retry(&text, &mut cancel).await {
                Ok(vector) => vector,
                Err(CallFailure::Cancelled) => {
                    terminal = TerminalReason::Aborted(SessionAbort::Cancelled { turn_index });
                    break;
                }
                Err(CallFailure::Exhausted { attempts, last }) => {
                    let abort = SessionAbort::EmbeddingUnavailable {
                        agent_id: agent.agent_id.clone(),
                        turn_index,
                        attempts,
                        message: last.to_string(),
                    };
                    warn!(
                        condition = %spec.condition,
                        agent = %agent.agent_id,
                        turn = turn_index,
                        error = %abort,
                        "Sealing session early: embedding backend exhausted retries"
                    );
                    terminal = TerminalReason::Aborted(abort);
                    break;
                }
            };

            // One dimensionality for the whole experiment; a drift here is a
            // misconfigured backend, not a recoverable turn failure.
            match expected_dim {
                None => expected_dim = Some(embedding.len()),
                Some(dim) if dim != embedding.len() => {
                    return Err(ConfigError::EmbeddingDimensionMismatch {
                        expected: dim,
                        actual: embedding.len(),
                        turn_index,
                    });
                }
                Some(_) => {}
            }

            debug!(
                condition = %spec.condition,
                turn = turn_index,
                agent = %agent.agent_id,
                chars = text.len(),
                "Recorded turn"
            );

            turns.push(Turn {
                turn_index,
                agent_id: agent.agent_id.clone(),
                text,
                embedding,
                duration_ms: turn_started.elapsed().as_millis() as u64,
            });
        }

        Ok(Session {
            session_id: Uuid::new_v4(),
            condition: spec.condition,
            seed: spec.seed,
            provocation_id: spec.provocation.id.clone(),
            turns,
            terminal,
            started_at,
            ended_at: Utc::now(),
        })
    }

    async fn generate_with_retry(
        &self,
        agent: &AgentConfig,
        context: &DialogueContext<'_>,
        cancel: &mut Option<CancelToken>,
    ) -> Result<String, CallFailure> {
        let mut last = BackendError::EmptyUtterance;
        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                if with_cancel(cancel, sleep(self.retry.delay_for(attempt - 1)))
                    .await
                    .is_none()
                {
                    return Err(CallFailure::Cancelled);
                }
            }
            let _permit = self.acquire_permit().await;
            let call = self
                .model
                .generate(&agent.persona, &agent.backend_id, agent.temperature, context);
            match with_cancel(cancel, call).await {
                None => return Err(CallFailure::Cancelled),
                Some(Ok(text)) if !text.trim().is_empty() => return Ok(text),
                Some(Ok(_)) => {
                    last = BackendError::EmptyUtterance;
                }
                Some(Err(e)) => {
                    debug!(agent = %agent.agent_id, attempt, error = %e, "Model call failed");
                    last = e;
                }
            }
        }
        Err(CallFailure::Exhausted {
            attempts: self.retry.max_attempts,
            last,
        })
    }

    async fn embed_with_retry(
        &self,
        text: &str,
        cancel: &mut Option<CancelToken>,
    ) -> Result<Vec<f32>, CallFailure> {
        let mut last = BackendError::EmptyUtterance;
        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                if with_cancel(cancel, sleep(self.retry.delay_for(attempt - 1)))
                    .await
                    .is_none()
                {
                    return Err(CallFailure::Cancelled);
                }
            }
            let _permit = self.acquire_permit().await;
            match with_cancel(cancel, self.embedder.embed(text)).await {
                None => return Err(CallFailure::Cancelled),
                Some(Ok(vector)) => return Ok(vector),
                Some(Err(e)) => {
                    debug!(attempt, error = %e, "Embedding call failed");
                    last = e;
                }
            }
        }
        Err(CallFailure::Exhausted {
            attempts: self.retry.max_attempts,
            last,
        })
    }

    async fn acquire_permit(&self) -> Option<tokio::sync::OwnedSemaphorePermit> {
        // The semaphore lives for the whole experiment; acquisition only
        // fails if it is closed, which nothing here does.
        self.llm_semaphore.clone().acquire_owned().await.ok()
    }
}

fn is_cancelled(cancel: &Option<CancelToken>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

/// Await `work`, returning `None` if the cancel signal fires first. The
/// `biased` ordering lets completed work win a race with cancellation so a
/// finished backend call is never discarded.
async fn with_cancel<F: std::future::Future>(
    cancel: &mut Option<CancelToken>,
    work: F,
) -> Option<F::Output> {
    match cancel {
        None => Some(work.await),
        Some(rx) => {
            tokio::select! {
                biased;
                out = work => Some(out),
                _ = wait_cancelled(rx) => None,
            }
        }
    }
}

async fn wait_cancelled(rx: &mut CancelToken) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender dropped without cancelling: this session can never be
            // cancelled, so park forever and let the work future resolve.
            std::future::pending::<()>().await;
        }
    }
}
