//! Layer-level building blocks shared by the four networks.
//!
//! Everything random here takes an explicit `rng`: parameter initialization and dropout masks are
//! drawn on the host from the caller's `ChaCha8Rng` and uploaded, so a run is reproducible from
//! its seed alone (no dependence on backend-global RNG state).

use burn_core as burn;

use burn::module::Param;
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor, TensorData};
use burn_nn::{Linear, LinearConfig};
use ndarray::Array2;
use rand::Rng;

use crate::{Error, Result};

/// Whether stochastic layers (dropout) are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Dropout active.
    Train,
    /// Dropout disabled; forward passes are deterministic.
    Eval,
}

/// A `d_in -> d_out` linear layer initialized from `rng`.
///
/// Weights and bias are drawn from `U(-1/sqrt(d_in), 1/sqrt(d_in))`.
pub fn seeded_linear<B: Backend>(
    device: &B::Device,
    d_in: usize,
    d_out: usize,
    rng: &mut impl Rng,
) -> Linear<B> {
    debug_assert!(d_in > 0 && d_out > 0);
    let bound = 1.0 / (d_in as f32).sqrt();
    let w: Vec<f32> = (0..d_in * d_out)
        .map(|_| rng.random_range(-bound..bound))
        .collect();
    let b: Vec<f32> = (0..d_out).map(|_| rng.random_range(-bound..bound)).collect();

    let mut linear = LinearConfig::new(d_in, d_out).with_bias(true).init(device);
    // Burn Linear weight is [d_input, d_output].
    linear.weight = Param::from_tensor(Tensor::from_data(TensorData::new(w, [d_in, d_out]), device));
    linear.bias = Some(Param::from_tensor(Tensor::from_data(
        TensorData::new(b, [d_out]),
        device,
    )));
    linear
}

/// Inverted dropout: zero each entry with probability `prob` and rescale survivors by
/// `1 / (1 - prob)`. Identity in [`Mode::Eval`] or when `prob == 0`.
pub fn dropout<B: Backend>(
    x: Tensor<B, 2>,
    prob: f64,
    mode: Mode,
    rng: &mut impl Rng,
) -> Tensor<B, 2> {
    if mode == Mode::Eval || prob <= 0.0 {
        return x;
    }
    debug_assert!(prob < 1.0);
    let [n, d] = x.dims();
    let keep = 1.0 - prob;
    let scale = (1.0 / keep) as f32;
    let mask: Vec<f32> = (0..n * d)
        .map(|_| if rng.random_bool(keep) { scale } else { 0.0 })
        .collect();
    let mask = Tensor::<B, 2>::from_data(TensorData::new(mask, [n, d]), &x.device());
    x * mask
}

/// Sum of squared entries of a linear layer's weight and bias.
pub fn linear_sq_norm<B: Backend>(linear: &Linear<B>) -> f32 {
    let mut s = linear
        .weight
        .val()
        .powf_scalar(2.0)
        .sum()
        .into_scalar()
        .elem::<f32>();
    if let Some(bias) = linear.bias.as_ref() {
        s += bias.val().powf_scalar(2.0).sum().into_scalar().elem::<f32>();
    }
    s
}

/// Read a scalar loss tensor back to the host.
pub fn scalar<B: Backend>(t: &Tensor<B, 1>) -> f32 {
    t.clone().into_scalar().elem::<f32>()
}

pub fn ndarray_to_burn_2<B: Backend>(device: &B::Device, x: &Array2<f32>) -> Tensor<B, 2> {
    let (n, d) = x.dim();
    // `iter()` walks in logical row-major order even for non-standard layouts.
    let data = TensorData::new(x.iter().copied().collect::<Vec<f32>>(), [n, d]);
    Tensor::from_data(data, device)
}

pub fn burn_to_ndarray_2<B: Backend>(x: Tensor<B, 2>) -> Result<Array2<f32>> {
    let [n, d] = x.dims();
    let flat = x
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::Tensor(format!("{e:?}")))?;
    Array2::from_shape_vec((n, d), flat).map_err(|_| Error::Shape("tensor data length mismatch"))
}
