//! Deterministic fault injection for in-process runs.
//!
//! Given the same seed, the same calls fail in the same order, so a failing
//! randomized run can be replayed exactly.

use crate::ledger::ActorId;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;

#[derive(Debug)]
pub struct FaultInjector {
    rng: ChaCha8Rng,
    /// Probability in [0, 1] that any single call fails.
    drop_rate: f64,
    /// Branches every call to which fails.
    isolated: HashSet<ActorId>,
    injected: u64,
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new(0)
    }
}

impl FaultInjector {
    pub fn new(seed: u64) -> Self {
        FaultInjector {
            rng: ChaCha8Rng::seed_from_u64(seed),
            drop_rate: 0.0,
            isolated: HashSet::new(),
            injected: 0,
        }
    }

    pub fn with_drop_rate(seed: u64, drop_rate: f64) -> Self {
        FaultInjector {
            drop_rate: drop_rate.clamp(0.0, 1.0),
            ..Self::new(seed)
        }
    }

    pub fn isolate(&mut self, target: ActorId) {
        self.isolated.insert(target);
    }

    pub fn restore(&mut self, target: ActorId) {
        self.isolated.remove(&target);
    }

    /// Number of calls failed so far.
    pub fn injected(&self) -> u64 {
        self.injected
    }

    /// Decide whether the next call to `target` fails.
    pub fn should_fail(&mut self, target: ActorId) -> bool {
        let fail = self.isolated.contains(&target) || self.roll();
        if fail {
            self.injected += 1;
        }
        fail
    }

    fn roll(&mut self) -> bool {
        if self.drop_rate <= 0.0 {
            return false;
        }
        let val = self.rng.next_u64() as f64 / u64::MAX as f64;
        val < self.drop_rate
    }
}
