//! Class-conditional sample synthesis from a trained decoder.

use burn_core as burn;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rand::Rng;

use crate::decoder::Decoder;
use crate::layers::{burn_to_ndarray_2, ndarray_to_burn_2, Mode};
use crate::model::AaeConfig;
use crate::prior::sample_gaussian;
use crate::simplex::one_hot;
use crate::{Error, Result};

/// Decode `per_class` Gaussian prior samples for every class.
///
/// Rows are grouped by class: rows `[k * per_class, (k + 1) * per_class)` carry the one-hot code of
/// class `k`. Output shape is `[per_class * n_classes, x_dim]`, every entry in `[0, 1]`.
pub fn synthesize<B: Backend>(
    decoder: &Decoder<B>,
    cfg: &AaeConfig,
    per_class: usize,
    device: &B::Device,
    rng: &mut impl Rng,
) -> Result<ndarray::Array2<f32>> {
    if !cfg.has_categorical() {
        return Err(Error::Domain("class-conditional synthesis needs a categorical code"));
    }
    if per_class == 0 {
        return Err(Error::Domain("per_class must be >= 1"));
    }
    let classes: Vec<usize> = (0..cfg.n_classes)
        .flat_map(|k| std::iter::repeat_n(k, per_class))
        .collect();
    let n = classes.len();
    let cat: Tensor<B, 2> = ndarray_to_burn_2(device, &one_hot(&classes, cfg.n_classes)?);
    let gauss = sample_gaussian::<B>(device, n, cfg.z_dim, rng);
    let z = Tensor::cat(vec![gauss, cat], 1);
    burn_to_ndarray_2(decoder.forward(z, Mode::Eval, rng))
}
