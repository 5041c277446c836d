//! Random number generation provider abstraction.
//!
//! The only consumer today is the ensemble selector, which shuffles its
//! candidate list once per client so that clients spread over the members.
//! Tests use [`SeededRandomProvider`] to get a reproducible order.

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::distr::uniform::SampleUniform;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::ops::Range;
use std::sync::Arc;

/// Provider trait for random number generation.
pub trait RandomProvider: Clone + Send + Sync + 'static {
    /// Generate a random value within `range` (exclusive upper bound).
    fn random_range<T>(&self, range: Range<T>) -> T
    where
        T: SampleUniform + PartialOrd;

    /// Shuffle a slice in place (Fisher-Yates over `random_range`).
    fn shuffle<T>(&self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.random_range(0..i + 1);
            items.swap(i, j);
        }
    }
}

/// Production random provider using the thread-local RNG.
#[derive(Debug, Clone, Default)]
pub struct TokioRandomProvider;

impl TokioRandomProvider {
    /// Create a new production random provider.
    pub fn new() -> Self {
        Self
    }
}

impl RandomProvider for TokioRandomProvider {
    fn random_range<T>(&self, range: Range<T>) -> T
    where
        T: SampleUniform + PartialOrd,
    {
        rand::rng().random_range(range)
    }
}

/// Deterministic random provider backed by a shared ChaCha8 stream.
///
/// Clones share the same stream, so the sequence observed across all clones
/// depends only on the seed and the call order.
#[derive(Debug, Clone)]
pub struct SeededRandomProvider {
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SeededRandomProvider {
    /// Create a provider seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }
}

impl RandomProvider for SeededRandomProvider {
    fn random_range<T>(&self, range: Range<T>) -> T
    where
        T: SampleUniform + PartialOrd,
    {
        self.rng.lock().random_range(range)
    }
}
