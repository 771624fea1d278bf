//! Seeded random tensors.

use kairos_core::Tensor;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// A tensor of the given shape with entries uniform in `[lo, hi)`.
///
/// The same seed always yields the same values.
pub fn random_tensor(shape: &[usize], seed: u64, lo: f64, hi: f64) -> Tensor {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut t = Tensor::zeros(shape);
    for v in t.as_mut_slice() {
        *v = rng.random_range(lo..hi);
    }
    t
}
