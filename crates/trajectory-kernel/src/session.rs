//! Session data model: turns, terminal reasons, and dialogue context.
//!
//! A `Session` is append-only while running and sealed on completion or
//! abort. Every turn owns its embedding (a turn never exists without one),
//! so a persisted session is sufficient to recompute all metrics offline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::agent::Condition;

/// One recorded utterance. Immutable once pushed into a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// 0-based, strictly increasing within a session.
    pub turn_index: usize,
    /// Who spoke.
    pub agent_id: String,
    /// The utterance text. Opaque to the engine.
    pub text: String,
    /// Embedding captured before the turn was sealed.
    pub embedding: Vec<f32>,
    /// Wall-clock duration of the turn (generation + embedding).
    pub duration_ms: u64,
}

/// Why a session stopped recording turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// The configured turn budget was fully recorded.
    MaxTurnsReached,
    /// The session was sealed early; partial turns are preserved.
    Aborted(SessionAbort),
}

impl TerminalReason {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

/// The specific failure that sealed a session early.
///
/// Session-local by design: these are recorded in the session rather than
/// raised past it, so the experiment keeps running and partial data stays
/// inspectable.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAbort {
    /// The model backend failed for this agent and turn after bounded retry.
    #[error(
        "agent {agent_id} failed at turn {turn_index} after {attempts} attempts: {message}"
    )]
    AgentInvocation {
        agent_id: String,
        turn_index: usize,
        attempts: usize,
        message: String,
    },

    /// The embedding backend failed for this turn after bounded retry.
    #[error(
        "embedding unavailable for agent {agent_id} at turn {turn_index} after {attempts} attempts: {message}"
    )]
    EmbeddingUnavailable {
        agent_id: String,
        turn_index: usize,
        attempts: usize,
        message: String,
    },

    /// The caller cancelled the in-flight session.
    #[error("session cancelled at turn {turn_index}")]
    Cancelled { turn_index: usize },
}

/// One condition's full dialogue, sealed on completion or abort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub condition: Condition,
    pub seed: u64,
    pub provocation_id: String,
    pub turns: Vec<Turn>,
    pub terminal: TerminalReason,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl Session {
    /// The ordered speaker identities: the quantity that must be identical
    /// across the two conditions of a matched pair.
    pub fn speaker_sequence(&self) -> Vec<&str> {
        self.turns.iter().map(|t| t.agent_id.as_str()).collect()
    }

    /// Embedding sequence in turn order, for the metrics engine.
    pub fn embeddings(&self) -> Vec<&[f32]> {
        self.turns.iter().map(|t| t.embedding.as_slice()).collect()
    }
}

/// The conversation visible to an agent at generation time: the provocation
/// plus every prior turn, with no engine-side truncation.
#[derive(Debug, Clone, Copy)]
pub struct DialogueContext<'a> {
    pub provocation: &'a str,
    pub turns: &'a [Turn],
}

impl DialogueContext<'_> {
    /// Render the visible context as prompt text, one line per prior turn.
    pub fn render(&self) -> String {
        let mut out = String::from(self.provocation);
        for turn in self.turns {
            out.push('\n');
            out.push_str(&format!("[{}] {}", turn.agent_id, turn.text));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(idx: usize, agent: &str, text: &str) -> Turn {
        Turn {
            turn_index: idx,
            agent_id: agent.to_string(),
            text: text.to_string(),
            embedding: vec![0.0, 1.0],
            duration_ms: 1,
        }
    }

    #[test]
    fn context_render_includes_provocation_and_history() {
        let turns = vec![turn(0, "a1", "hello"), turn(1, "a2", "reply")];
        let ctx = DialogueContext {
            provocation: "open question",
            turns: &turns,
        };
        let rendered = ctx.render();
        assert!(rendered.starts_with("open question"));
        assert!(rendered.contains("[a1] hello"));
        assert!(rendered.contains("[a2] reply"));
    }

    #[test]
    fn abort_reason_names_agent_and_turn() {
        let abort = SessionAbort::AgentInvocation {
            agent_id: "a3".to_string(),
            turn_index: 5,
            attempts: 3,
            message: "timeout".to_string(),
        };
        let msg = abort.to_string();
        assert!(msg.contains("a3"));
        assert!(msg.contains("turn 5"));
        assert!(TerminalReason::Aborted(abort).is_aborted());
    }
}
