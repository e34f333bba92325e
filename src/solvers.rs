//! The optimizers of one training run.
//!
//! The encoder is updated by three objectives and gets three independent Adam instances, one per
//! role, so the moment estimates of one objective never leak into another.

use burn_core as burn;

use burn::tensor::backend::AutodiffBackend;
use burn_optim::adaptor::OptimizerAdaptor;
use burn_optim::{Adam, AdamConfig};

use crate::decoder::Decoder;
use crate::discriminator::Discriminator;
use crate::encoder::Encoder;
use crate::model::AaeConfig;
use crate::schedule::LearningRates;

pub type AdamFor<M, B> = OptimizerAdaptor<Adam, M, B>;

pub struct Solvers<B: AutodiffBackend> {
    pub decoder: AdamFor<Decoder<B>, B>,
    pub encoder_recon: AdamFor<Encoder<B>, B>,
    pub encoder_gen: AdamFor<Encoder<B>, B>,
    /// `None` in the unsupervised variant.
    pub encoder_semi: Option<AdamFor<Encoder<B>, B>>,
    pub d_gauss: AdamFor<Discriminator<B>, B>,
    /// `None` in the unsupervised variant.
    pub d_cat: Option<AdamFor<Discriminator<B>, B>>,
    rates: LearningRates,
}

fn adam() -> AdamConfig {
    AdamConfig::new().with_epsilon(1e-8)
}

impl<B: AutodiffBackend> Solvers<B> {
    /// Fresh optimizers (no moment state) bound to `rates`.
    pub fn new(rates: LearningRates, cfg: &AaeConfig) -> Self {
        let semi = cfg.has_categorical();
        Self {
            decoder: adam().init(),
            encoder_recon: adam().init(),
            encoder_gen: adam().init(),
            encoder_semi: semi.then(|| adam().init()),
            d_gauss: adam().init(),
            d_cat: semi.then(|| adam().init()),
            rates,
        }
    }

    pub fn rates(&self) -> LearningRates {
        self.rates
    }
}
