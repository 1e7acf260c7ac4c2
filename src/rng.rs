//! Per-worker random variate source.
//!
//! Each worker owns one [`VariateSource`]. There is no process-wide random
//! state: two workers never share a generator, and a worker seeded with the
//! same `(seed, rank)` pair always replays the same variate sequence.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};

/// Odd constant from the golden ratio, used to spread ranks over the seed space.
const RANK_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Seeded generator of uniform integers and reals.
///
/// Implements [`RngCore`], so adapters can also use every [`Rng`] helper
/// (`random_range`, `random_bool`, ...) on it directly.
///
/// # Examples
///
/// ```
/// use u_anneal::rng::VariateSource;
///
/// let mut a = VariateSource::for_worker(7, 0);
/// let mut b = VariateSource::for_worker(7, 0);
/// assert_eq!(a.uniform_int(0, 100), b.uniform_int(0, 100));
///
/// let u = a.uniform_real();
/// assert!((0.0..1.0).contains(&u));
/// ```
#[derive(Debug, Clone)]
pub struct VariateSource {
    seed: u64,
    rng: StdRng,
}

impl VariateSource {
    /// Creates a source from an explicit seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Creates the stream for worker `rank` of a run seeded with `seed`.
    ///
    /// Rank 0 uses `seed` unchanged, so a single-worker run is reproducible
    /// from the seed alone.
    pub fn for_worker(seed: u64, rank: usize) -> Self {
        Self::new(worker_seed(seed, rank))
    }

    /// The seed this source was created from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Uniform integer in the closed range `[min, max]`.
    ///
    /// # Panics
    ///
    /// Panics if `min > max`.
    pub fn uniform_int(&mut self, min: usize, max: usize) -> usize {
        self.rng.random_range(min..=max)
    }

    /// Uniform real in the half-open range `[0, 1)`.
    pub fn uniform_real(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Shuffles a slice in place (Fisher-Yates).
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }
}

impl RngCore for VariateSource {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        self.rng.fill_bytes(dst)
    }
}

/// Derives the seed of worker `rank` from the run seed.
pub fn worker_seed(seed: u64, rank: usize) -> u64 {
    seed ^ (rank as u64).wrapping_mul(RANK_STRIDE)
}
