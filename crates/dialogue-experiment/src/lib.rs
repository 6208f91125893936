//! Matched-pair dialogue experiment harness.
//!
//! Runs paired multi-turn dialogues among a fixed agent ensemble under two
//! backend-assignment conditions (single-model vs multi-model), captures a
//! per-turn embedding trajectory, and aggregates trajectory-metric deltas
//! across pairs into summary statistics and significance tests.
//!
//! The deterministic half (scheduling, seeded randomness, metrics) lives in
//! `trajectory-kernel`; this crate adds the async pieces: backend contracts,
//! the vLLM-compatible HTTP client, session and pair runners, cross-pair
//! aggregation, and result persistence.

pub mod aggregate;
pub mod backend;
pub mod experiment;
pub mod pair;
pub mod results;
pub mod runner;
pub mod vllm_client;
