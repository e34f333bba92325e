//! Decoder P: code (continuous ⧺ categorical) -> reconstruction in `[0, 1]`.

use burn_core as burn;

use burn::module::Module;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use burn_nn::{Linear, Relu};
use rand::Rng;

use crate::layers::{dropout, linear_sq_norm, seeded_linear, Mode};
use crate::model::AaeConfig;

#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    lin1: Linear<B>,
    lin2: Linear<B>,
    lin3: Linear<B>,
    dropout: f64,
}

impl<B: Backend> Decoder<B> {
    pub fn new(device: &B::Device, cfg: &AaeConfig, rng: &mut impl Rng) -> Self {
        Self {
            lin1: seeded_linear(device, cfg.code_dim(), cfg.hidden, rng),
            lin2: seeded_linear(device, cfg.hidden, cfg.hidden, rng),
            lin3: seeded_linear(device, cfg.hidden, cfg.x_dim, rng),
            dropout: cfg.dropout.decoder,
        }
    }

    /// `z`: `[batch, code_dim]` -> `[batch, x_dim]`, every entry in `[0, 1]`.
    pub fn forward(&self, z: Tensor<B, 2>, mode: Mode, rng: &mut impl Rng) -> Tensor<B, 2> {
        let h = Relu.forward(dropout(self.lin1.forward(z), self.dropout, mode, rng));
        let h = Relu.forward(dropout(self.lin2.forward(h), self.dropout, mode, rng));
        sigmoid(self.lin3.forward(h))
    }

    pub(crate) fn sq_norm(&self) -> f32 {
        linear_sq_norm(&self.lin1) + linear_sq_norm(&self.lin2) + linear_sq_norm(&self.lin3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{burn_to_ndarray_2, ndarray_to_burn_2};
    use crate::model::{DropoutRates, Variant};
    use crate::BurnBackend;
    use ndarray::Array2;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn cfg() -> AaeConfig {
        AaeConfig {
            x_dim: 30,
            hidden: 24,
            z_dim: 4,
            n_classes: 3,
            variant: Variant::SemiSupervised,
            dropout: DropoutRates::default(),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 24,
            .. ProptestConfig::default()
        })]
        #[test]
        fn prop_reconstruction_is_in_unit_interval(
            batch in 1usize..9,
            seed in any::<u64>(),
            scale in 0.1f32..50.0f32,
            train in any::<bool>(),
        ) {
            let device = <BurnBackend as Backend>::Device::default();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let dec = Decoder::<BurnBackend>::new(&device, &cfg(), &mut rng);
            let z = Array2::from_shape_fn((batch, 7), |_| rng.random_range(-scale..scale));
            let mode = if train { Mode::Train } else { Mode::Eval };
            let out = burn_to_ndarray_2(dec.forward(ndarray_to_burn_2(&device, &z), mode, &mut rng)).unwrap();
            prop_assert_eq!(out.dim(), (batch, 30));
            prop_assert!(out.iter().all(|&v| (0.0..=1.0).contains(&v)), "decoder left [0,1]");
        }
    }
}
