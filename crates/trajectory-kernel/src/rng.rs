//! Seeded RNG service: deterministic generators keyed by `(base_seed, turn_index)`.
//!
//! Every random draw in the experiment goes through a generator produced
//! here. A generator is a pure function of its two inputs, with no
//! process-wide state and no reuse across turns, so a (single, multi)
//! pair and repeated experiment runs see identical draw sequences on any
//! machine.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Reserved stream index for embedding clustering.
///
/// Metric-side randomness (k-means initialization in the entropy-shift
/// computation) must never collide with a scheduler stream, which is keyed
/// by a real turn index. Turn indices are bounded by `max_turns`, so the
/// maximum value is safe to reserve.
pub const CLUSTER_STREAM: u64 = u64::MAX;

/// splitmix64 step: the standard 64-bit mixer used to expand a small seed
/// into independent words.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Build a deterministic generator for one `(base_seed, turn_index)` stream.
///
/// The 32-byte ChaCha seed is filled from a splitmix64 sequence whose state
/// combines both keys, so adjacent turn indices produce statistically
/// unrelated streams. ChaCha8 output is stable across platforms, which is
/// what makes matched-pair comparisons and re-runs byte-for-byte comparable.
pub fn rng_for(base_seed: u64, turn_index: u64) -> ChaCha8Rng {
    let mut state = base_seed ^ turn_index.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut seed = [0u8; 32];
    for chunk in seed.chunks_exact_mut(8) {
        chunk.copy_from_slice(&splitmix64(&mut state).to_le_bytes());
    }
    ChaCha8Rng::from_seed(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn same_keys_same_stream() {
        let mut a = rng_for(42, 7);
        let mut b = rng_for(42, 7);
        for _ in 0..64 {
            assert_eq!(a.random::<u64>(), b.random::<u64>());
        }
    }

    #[test]
    fn different_turn_different_stream() {
        let mut a = rng_for(42, 7);
        let mut b = rng_for(42, 8);
        let draws_a: Vec<u64> = (0..8).map(|_| a.random()).collect();
        let draws_b: Vec<u64> = (0..8).map(|_| b.random()).collect();
        assert_ne!(draws_a, draws_b);
    }

    #[test]
    fn different_seed_different_stream() {
        let mut a = rng_for(1, 0);
        let mut b = rng_for(2, 0);
        let draws_a: Vec<u64> = (0..8).map(|_| a.random()).collect();
        let draws_b: Vec<u64> = (0..8).map(|_| b.random()).collect();
        assert_ne!(draws_a, draws_b);
    }

    #[test]
    fn cluster_stream_is_distinct_from_turn_streams() {
        let mut cluster = rng_for(42, CLUSTER_STREAM);
        let mut turn0 = rng_for(42, 0);
        assert_ne!(cluster.random::<u64>(), turn0.random::<u64>());
    }
}
