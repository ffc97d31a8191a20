//! Deterministic random number generation.
//!
//! RULE: nothing in the model may call a platform RNG. The only consumer of
//! randomness is synthetic population generation, and every draw flows
//! through a `PopulationRng` derived from the scenario's `random_seed`.
//!
//! Each population segment gets its own stream, seeded from
//! (random_seed XOR scrambled segment index). This means:
//!   - Adding a segment at the end never changes earlier segments' agents.
//!   - Any segment can be regenerated in isolation.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

pub struct PopulationRng {
    inner: Pcg64Mcg,
}

impl PopulationRng {
    /// Create the stream for one segment. The index of a segment must never
    /// change once a scenario has been published.
    pub fn new(master_seed: u64, stream: u64) -> Self {
        let derived_seed = master_seed ^ stream.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self {
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Uniform draw in [lo, hi). Returns `lo` when the range is empty.
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        if hi <= lo {
            return lo;
        }
        lo + (hi - lo) * self.next_f64()
    }

    /// `mean` scaled by a symmetric relative spread: mean × (1 ± spread).
    pub fn jitter(&mut self, mean: f64, spread: f64) -> f64 {
        let spread = spread.clamp(0.0, 1.0);
        mean * (1.0 + spread * (2.0 * self.next_f64() - 1.0))
    }
}
