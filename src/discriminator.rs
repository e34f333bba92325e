//! Discriminators `D_cat` and `D_gauss`: code -> probability the code came from the prior.
//!
//! Both share one architecture and differ only in input width and in the prior they are trained
//! against, so a single type serves both.

use burn_core as burn;

use burn::module::Module;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use burn_nn::{Linear, Relu};
use rand::Rng;

use crate::layers::{dropout, linear_sq_norm, seeded_linear, Mode};

#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    lin1: Linear<B>,
    lin2: Linear<B>,
    lin3: Linear<B>,
    in_dim: usize,
    dropout: f64,
}

impl<B: Backend> Discriminator<B> {
    pub fn new(
        device: &B::Device,
        in_dim: usize,
        hidden: usize,
        dropout: f64,
        rng: &mut impl Rng,
    ) -> Self {
        Self {
            lin1: seeded_linear(device, in_dim, hidden, rng),
            lin2: seeded_linear(device, hidden, hidden, rng),
            lin3: seeded_linear(device, hidden, 1, rng),
            in_dim,
            dropout,
        }
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    /// `code`: `[batch, in_dim]` -> `[batch, 1]` in `[0, 1]`.
    pub fn forward(&self, code: Tensor<B, 2>, mode: Mode, rng: &mut impl Rng) -> Tensor<B, 2> {
        debug_assert_eq!(code.dims()[1], self.in_dim);
        let h = Relu.forward(dropout(self.lin1.forward(code), self.dropout, mode, rng));
        let h = Relu.forward(dropout(self.lin2.forward(h), self.dropout, mode, rng));
        sigmoid(self.lin3.forward(h))
    }

    pub(crate) fn sq_norm(&self) -> f32 {
        linear_sq_norm(&self.lin1) + linear_sq_norm(&self.lin2) + linear_sq_norm(&self.lin3)
    }
}
