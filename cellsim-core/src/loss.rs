use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

// ---------------------------------------------------------------------------
// LossModel
// ---------------------------------------------------------------------------

/// Fixed seed for the loss PRNG.
///
/// Changing this invalidates reproductions of previously recorded emulation
/// runs, so it is part of the tool's external contract.
pub const LOSS_SEED: u64 = 0;

/// Bernoulli ingress loss with a fixed-seed PRNG.
///
/// Each direction owns its own generator, so uplink and downlink draw
/// independent but reproducible sequences: identical inputs give
/// bit-identical drop decisions across runs.
pub struct LossModel {
    // ---
    rate: f64,
    rng: SmallRng,
}

// ---

impl LossModel {
    // ---
    pub fn new(rate: f64) -> Self {
        // ---
        Self {
            rate,
            rng: SmallRng::seed_from_u64(LOSS_SEED),
        }
    }

    // ---

    /// Draw once from `[0, 1)`; `true` means drop the packet at ingress.
    pub fn should_drop(&mut self) -> bool {
        self.rng.gen::<f64>() < self.rate
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
