//! Agent and provocation types shared by both experimental conditions.

use serde::{Deserialize, Serialize};

/// The immutable opening prompt that seeds a dialogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provocation {
    /// Stable identifier, carried through every derived result.
    pub id: String,
    /// The prompt text itself. Opaque to the engine.
    pub text: String,
}

impl Provocation {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// One agent in the ensemble.
///
/// The persona is an opaque handle: the engine passes it through to the
/// model backend and never inspects its content. Only `backend_id` may
/// differ between the single-model and multi-model conditions of a pair;
/// the pair runner enforces that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique, stable across both conditions of a pair.
    pub agent_id: String,
    /// Opaque persona reference handed to the model backend.
    pub persona: String,
    /// Which model backend serves this agent in this condition.
    pub backend_id: String,
    /// Sampling temperature for this agent's generations.
    pub temperature: f32,
}

/// Experimental condition tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Every agent is served by the same model backend.
    Single,
    /// Agents are spread across distinct model backends.
    Multi,
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Multi => write!(f, "multi"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_display_matches_serde_tag() {
        assert_eq!(Condition::Single.to_string(), "single");
        assert_eq!(Condition::Multi.to_string(), "multi");
        assert_eq!(
            serde_json::to_string(&Condition::Multi).unwrap(),
            "\"multi\""
        );
    }
}
