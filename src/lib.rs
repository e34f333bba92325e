//! # ssaae
//!
//! Semi-supervised adversarial autoencoder (AAE) training on MNIST-like data.
//!
//! This crate is intentionally small:
//!
//! - it implements the **three-phase training loop** (reconstruction, adversarial regularization,
//!   semi-supervised classification) over four networks and six optimizers,
//! - it uses `burn` for autodiff, layers and Adam, and `ndarray` for host-side data,
//! - the `ssaae` binary is a thin CLI around [`train::train`].
//!
//! ## Public invariants (must not change)
//!
//! - **Determinism knobs are explicit**: initialization, dropout masks, prior samples and data
//!   shuffling all come from `ChaCha8Rng` streams derived from a configured seed.
//! - **No hidden normalization**: batches are scaled by [`data::Normalization`] and nothing else.
//! - **Gradient isolation**: each training phase runs its own backward pass, extracts the
//!   gradients of the modules it owns, and drops the rest (see [`phase`]).
//! - **Homogeneous batches**: a batch is labeled or unlabeled, never both
//!   ([`data::BatchKind`]).
//!
//! ## How this maps to the AAE paper
//!
//! Makhzani et al., *Adversarial Autoencoders* (arXiv:1511.05644), §5 (semi-supervised AAE):
//!
//! - the encoder `q(y, z | x)` has a softmax head `y` (categorical code) and a linear head `z`
//!   (continuous code),
//! - `y` is matched to a uniform categorical prior and `z` to `N(0, I)` by two discriminators,
//! - the labeled mini-batch updates `q(y | x)` with cross-entropy.
//!
//! ## Module map
//!
//! - `model`, `encoder`, `decoder`, `discriminator`, `layers`: the networks
//! - `prior`, `simplex`, `loss`: sampling and objectives
//! - `data`: partitions, batches, loaders, `.npy` input
//! - `schedule`, `solvers`, `phase`, `train`: the orchestrator
//! - `metrics`, `generate`, `checkpoint`: evaluation and outputs

pub mod checkpoint;
pub mod data;
pub mod decoder;
pub mod discriminator;
pub mod encoder;
pub mod generate;
pub mod layers;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod phase;
pub mod prior;
pub mod schedule;
pub mod simplex;
pub mod solvers;
pub mod train;

use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;

/// Default burn backend for training: ndarray + autodiff.
pub type BurnBackend = Autodiff<NdArray<f32>>;

/// ssaae error variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("shape mismatch: {0}")]
    Shape(&'static str),
    #[error("domain error: {0}")]
    Domain(&'static str),
    #[error("batch mixes {labeled} labeled and {unlabeled} unlabeled samples")]
    MixedBatch { labeled: usize, unlabeled: usize },
    #[error("batch size {batch_size} does not divide partition `{partition}` of {len} samples")]
    BatchSize {
        partition: String,
        len: usize,
        batch_size: usize,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("npy error: {0}")]
    Npy(String),
    #[error("record error: {0}")]
    Record(String),
    #[error("tensor data error: {0}")]
    Tensor(String),
}

pub type Result<T> = std::result::Result<T, Error>;
