//! Network configuration and the bundle of four networks trained together.

use burn_core as burn;

use burn::module::AutodiffModule;
use burn::tensor::backend::{AutodiffBackend, Backend};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::decoder::Decoder;
use crate::discriminator::Discriminator;
use crate::encoder::Encoder;
use crate::{Error, Result};

/// Which AAE is trained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Variant {
    /// Four networks: encoder with categorical + Gaussian heads, decoder, `D_cat`, `D_gauss`.
    #[default]
    SemiSupervised,
    /// Three networks: encoder with a Gaussian head only, decoder over `z`, `D_gauss`.
    /// Labels are ignored.
    Unsupervised,
}

/// Dropout probabilities per network family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropoutRates {
    pub encoder: f64,
    pub decoder: f64,
    pub discriminator: f64,
}

impl Default for DropoutRates {
    fn default() -> Self {
        Self {
            encoder: 0.25,
            decoder: 0.25,
            discriminator: 0.2,
        }
    }
}

impl DropoutRates {
    /// No dropout anywhere (deterministic forward passes in both modes).
    pub fn none() -> Self {
        Self {
            encoder: 0.0,
            decoder: 0.0,
            discriminator: 0.0,
        }
    }
}

/// Architecture of the four networks.
#[derive(Debug, Clone, PartialEq)]
pub struct AaeConfig {
    /// Input dimensionality (flattened image).
    pub x_dim: usize,
    /// Width of every hidden layer.
    pub hidden: usize,
    /// Continuous code dimensionality.
    pub z_dim: usize,
    /// Number of classes (categorical code dimensionality).
    pub n_classes: usize,
    pub variant: Variant,
    pub dropout: DropoutRates,
}

impl Default for AaeConfig {
    fn default() -> Self {
        Self {
            x_dim: 784,
            hidden: 1000,
            z_dim: 10,
            n_classes: 10,
            variant: Variant::SemiSupervised,
            dropout: DropoutRates::default(),
        }
    }
}

impl AaeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.x_dim == 0 || self.hidden == 0 || self.z_dim == 0 {
            return Err(Error::Domain("x_dim, hidden and z_dim must be >= 1"));
        }
        if self.n_classes < 2 {
            return Err(Error::Domain("n_classes must be >= 2"));
        }
        let p = self.dropout;
        for rate in [p.encoder, p.decoder, p.discriminator] {
            if !(0.0..1.0).contains(&rate) {
                return Err(Error::Domain("dropout rates must be in [0, 1)"));
            }
        }
        Ok(())
    }

    /// True when the encoder has a categorical head (and `D_cat` exists).
    pub fn has_categorical(&self) -> bool {
        self.variant == Variant::SemiSupervised
    }

    /// Width of the decoder input: `z_dim (+ n_classes)`.
    pub fn code_dim(&self) -> usize {
        if self.has_categorical() {
            self.z_dim + self.n_classes
        } else {
            self.z_dim
        }
    }
}

/// The networks of one AAE. Each network owns its parameters; nothing is shared.
#[derive(Debug, Clone)]
pub struct Networks<B: Backend> {
    /// Q.
    pub encoder: Encoder<B>,
    /// P.
    pub decoder: Decoder<B>,
    /// `None` in the unsupervised variant.
    pub d_cat: Option<Discriminator<B>>,
    pub d_gauss: Discriminator<B>,
}

impl<B: Backend> Networks<B> {
    /// Initialize all networks from one seed (encoder, decoder, `D_cat`, `D_gauss`, in that order).
    pub fn new(device: &B::Device, cfg: &AaeConfig, seed: u64) -> Result<Self> {
        cfg.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let encoder = Encoder::new(device, cfg, &mut rng);
        let decoder = Decoder::new(device, cfg, &mut rng);
        let d_cat = cfg.has_categorical().then(|| {
            Discriminator::new(
                device,
                cfg.n_classes,
                cfg.hidden,
                cfg.dropout.discriminator,
                &mut rng,
            )
        });
        let d_gauss = Discriminator::new(
            device,
            cfg.z_dim,
            cfg.hidden,
            cfg.dropout.discriminator,
            &mut rng,
        );
        Ok(Self {
            encoder,
            decoder,
            d_cat,
            d_gauss,
        })
    }

    pub fn param_norms(&self) -> ParamNorms {
        ParamNorms {
            encoder: self.encoder.sq_norm().sqrt(),
            decoder: self.decoder.sq_norm().sqrt(),
            d_cat: self.d_cat.as_ref().map(|d| d.sq_norm().sqrt()),
            d_gauss: self.d_gauss.sq_norm().sqrt(),
        }
    }
}

impl<B: AutodiffBackend> Networks<B> {
    /// The same parameters on the inner backend, outside the autodiff graph.
    pub fn valid(&self) -> Networks<B::InnerBackend> {
        Networks {
            encoder: self.encoder.valid(),
            decoder: self.decoder.valid(),
            d_cat: self.d_cat.as_ref().map(|d| d.valid()),
            d_gauss: self.d_gauss.valid(),
        }
    }
}

/// L2 norms of every network's parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamNorms {
    pub encoder: f32,
    pub decoder: f32,
    pub d_cat: Option<f32>,
    pub d_gauss: f32,
}
