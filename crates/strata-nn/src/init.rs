// init — weight initialization helpers
//
// Filters are drawn from N(0, σ²) with σ = sqrt(2 / fan), where fan is the
// number of weights in the filter (side² · channels).

use rand::Rng;
use strata_core::tensor;

/// Standard deviation for a filter holding `len` weights.
pub fn filter_std(len: usize) -> f64 {
    if len == 0 {
        return 0.0;
    }
    (2.0 / len as f64).sqrt()
}

/// `len` weights drawn with [`filter_std`].
pub fn filter_weights<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Vec<f64> {
    tensor::gaussian(filter_std(len), len, rng)
}
