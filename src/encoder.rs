//! Encoder Q: input vector -> (categorical code, continuous code).

use burn_core as burn;

use burn::module::Module;
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use burn_nn::{Linear, Relu};
use rand::Rng;

use crate::layers::{dropout, linear_sq_norm, seeded_linear, Mode};
use crate::model::AaeConfig;

/// Output of the encoder for one batch.
#[derive(Debug, Clone)]
pub struct Codes<B: Backend> {
    /// `[batch, n_classes]`, rows on the probability simplex. `None` without a categorical head.
    pub cat: Option<Tensor<B, 2>>,
    /// `[batch, z_dim]`, unconstrained.
    pub gauss: Tensor<B, 2>,
}

impl<B: Backend> Codes<B> {
    /// Decoder input: continuous ⧺ categorical.
    pub fn latent(self) -> Tensor<B, 2> {
        match self.cat {
            Some(cat) => Tensor::cat(vec![self.gauss, cat], 1),
            None => self.gauss,
        }
    }

    /// Cut both codes out of the autodiff graph.
    pub fn detach(self) -> Self {
        Self {
            cat: self.cat.map(|c| c.detach()),
            gauss: self.gauss.detach(),
        }
    }
}

#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    lin1: Linear<B>,
    lin2: Linear<B>,
    cat_head: Option<Linear<B>>,
    gauss_head: Linear<B>,
    dropout: f64,
}

impl<B: Backend> Encoder<B> {
    pub fn new(device: &B::Device, cfg: &AaeConfig, rng: &mut impl Rng) -> Self {
        let lin1 = seeded_linear(device, cfg.x_dim, cfg.hidden, rng);
        let lin2 = seeded_linear(device, cfg.hidden, cfg.hidden, rng);
        let cat_head = cfg
            .has_categorical()
            .then(|| seeded_linear(device, cfg.hidden, cfg.n_classes, rng));
        let gauss_head = seeded_linear(device, cfg.hidden, cfg.z_dim, rng);
        Self {
            lin1,
            lin2,
            cat_head,
            gauss_head,
            dropout: cfg.dropout.encoder,
        }
    }

    /// Forward pass. `x`: `[batch, x_dim]`.
    pub fn forward(&self, x: Tensor<B, 2>, mode: Mode, rng: &mut impl Rng) -> Codes<B> {
        let h = Relu.forward(dropout(self.lin1.forward(x), self.dropout, mode, rng));
        let h = Relu.forward(dropout(self.lin2.forward(h), self.dropout, mode, rng));
        let cat = self
            .cat_head
            .as_ref()
            .map(|head| softmax(head.forward(h.clone()), 1));
        let gauss = self.gauss_head.forward(h);
        Codes { cat, gauss }
    }

    pub fn has_categorical(&self) -> bool {
        self.cat_head.is_some()
    }

    pub(crate) fn sq_norm(&self) -> f32 {
        let mut s = linear_sq_norm(&self.lin1) + linear_sq_norm(&self.lin2);
        if let Some(head) = self.cat_head.as_ref() {
            s += linear_sq_norm(head);
        }
        s + linear_sq_norm(&self.gauss_head)
    }
}
