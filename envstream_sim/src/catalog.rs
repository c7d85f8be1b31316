//! Built-in environment catalog.

use envstream_core::{EnvRegistry, RegistryError};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::gridwalk::Gridwalk;
use crate::paddle::Paddle;

/// Hands out one seed per created environment instance.
///
/// Seeds derive from a master seed and a creation counter, so the n-th
/// session on a given registry always sees the same episode.
#[derive(Debug)]
pub struct SeedSource {
    master: u64,
    created: AtomicU64,
}

impl SeedSource {
    pub fn new(master: u64) -> Self {
        Self {
            master,
            created: AtomicU64::new(0),
        }
    }

    pub fn shared(master: u64) -> Arc<Self> {
        Arc::new(Self::new(master))
    }

    /// Seed for the next instance.
    pub fn next_seed(&self) -> u64 {
        let n = self.created.fetch_add(1, Ordering::Relaxed);
        let mut rng = ChaCha8Rng::seed_from_u64(self.master.wrapping_add(n));
        rng.next_u64()
    }
}

/// Registry holding `Paddle-v0` and `Gridwalk-v0`.
pub fn builtin_registry(master_seed: u64) -> Result<EnvRegistry, RegistryError> {
    let seeds = SeedSource::shared(master_seed);
    EnvRegistry::builder()
        .register(Paddle::spec(Arc::clone(&seeds)))
        .register(Gridwalk::spec(seeds))
        .build()
}
