//! Prior samplers: the "real" side of both discriminators.
//!
//! Samples are drawn on the host from the caller's RNG (so a seed pins them) and uploaded.

use burn_core as burn;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::encoder::Codes;
use crate::layers::ndarray_to_burn_2;
use crate::model::AaeConfig;

/// `[batch, n_classes]` one-hot rows, class drawn uniformly.
pub fn sample_categorical_host(batch: usize, n_classes: usize, rng: &mut impl Rng) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros((batch, n_classes));
    for i in 0..batch {
        out[[i, rng.random_range(0..n_classes)]] = 1.0;
    }
    out
}

/// `[batch, dim]` with independent `N(0, 1)` entries.
pub fn sample_gaussian_host(batch: usize, dim: usize, rng: &mut impl Rng) -> Array2<f32> {
    Array2::from_shape_simple_fn((batch, dim), || StandardNormal.sample(&mut *rng))
}

pub fn sample_categorical<B: Backend>(
    device: &B::Device,
    batch: usize,
    n_classes: usize,
    rng: &mut impl Rng,
) -> Tensor<B, 2> {
    ndarray_to_burn_2(device, &sample_categorical_host(batch, n_classes, rng))
}

pub fn sample_gaussian<B: Backend>(
    device: &B::Device,
    batch: usize,
    dim: usize,
    rng: &mut impl Rng,
) -> Tensor<B, 2> {
    ndarray_to_burn_2(device, &sample_gaussian_host(batch, dim, rng))
}

/// A batch of prior codes shaped like the encoder output for `cfg`.
///
/// The categorical batch is drawn first, then the Gaussian batch.
pub fn sample_codes<B: Backend>(
    device: &B::Device,
    batch: usize,
    cfg: &AaeConfig,
    rng: &mut impl Rng,
) -> Codes<B> {
    let cat = cfg
        .has_categorical()
        .then(|| sample_categorical(device, batch, cfg.n_classes, rng));
    let gauss = sample_gaussian(device, batch, cfg.z_dim, rng);
    Codes { cat, gauss }
}
