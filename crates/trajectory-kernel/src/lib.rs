//! Trajectory Kernel: deterministic core for matched-pair dialogue experiments.
//!
//! This crate implements the backend-free half of the experiment engine:
//! - Seeded randomness keyed by `(base_seed, turn_index)` so paired runs
//!   are exactly reproducible across processes and machines
//! - Frequency-weighted turn scheduling over an agent ensemble
//! - The session data model (turns, terminal reasons, dialogue context)
//! - Semantic-trajectory metrics: velocity, curvature, DFA exponent, and
//!   entropy shift over a session's embedding sequence
//!
//! Everything here is synchronous and pure: the same inputs always produce
//! the same outputs. Backend I/O lives in the `dialogue-experiment` crate.

pub mod agent;
pub mod config;
pub mod error;
pub mod metrics;
pub mod rng;
pub mod scheduler;
pub mod session;

pub use agent::{AgentConfig, Condition, Provocation};
pub use config::{MetricsConfig, SchedulerConfig};
pub use error::{ConfigError, EmptyEnsembleError, MetricError};
pub use metrics::{MetricResult, MetricSet};
pub use rng::{rng_for, CLUSTER_STREAM};
pub use scheduler::TurnScheduler;
pub use session::{DialogueContext, Session, SessionAbort, TerminalReason, Turn};
