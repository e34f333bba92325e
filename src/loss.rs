//! Objectives for the three phases.
//!
//! Every logarithm is taken of `p + TINY` (or `1 - p + TINY`), so a saturated sigmoid/softmax
//! output yields a large finite loss instead of `-inf`.

use burn_core as burn;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

pub const TINY: f32 = 1e-15;

/// Binary cross-entropy between a reconstruction `p` and its input `x`, averaged over every
/// element:
///
/// \[
/// L = -\tfrac{1}{nd}\sum_{i,k} x_{ik}\log(p_{ik}+\epsilon) + (1-x_{ik})\log(1-p_{ik}+\epsilon).
/// \]
pub fn reconstruction<B: Backend>(p: Tensor<B, 2>, x: Tensor<B, 2>) -> Tensor<B, 1> {
    let log_p = p.clone().add_scalar(TINY).log();
    let log_q = p.neg().add_scalar(1.0).add_scalar(TINY).log();
    let bce = x.clone() * log_p + x.neg().add_scalar(1.0) * log_q;
    bce.mean().neg()
}

/// Standard discriminator loss: `-mean(log D(real) + log(1 - D(fake)))`.
pub fn discriminator<B: Backend>(d_real: Tensor<B, 2>, d_fake: Tensor<B, 2>) -> Tensor<B, 1> {
    let real = d_real.add_scalar(TINY).log();
    let fake = d_fake.neg().add_scalar(1.0).add_scalar(TINY).log();
    (real + fake).mean().neg()
}

/// Non-saturating generator loss for one discriminator: `-mean(log D(fake))`.
pub fn generator<B: Backend>(d_fake: Tensor<B, 2>) -> Tensor<B, 1> {
    d_fake.add_scalar(TINY).log().mean().neg()
}

/// Multi-class cross-entropy of categorical probabilities against one-hot targets:
/// `-mean_i log(p_{i, y_i})`.
pub fn classification<B: Backend>(probs: Tensor<B, 2>, one_hot: Tensor<B, 2>) -> Tensor<B, 1> {
    (one_hot * probs.add_scalar(TINY).log())
        .sum_dim(1)
        .mean()
        .neg()
}
