//! Epoch driver: learning-rate schedule, lockstep batch iteration, periodic evaluation and the
//! final snapshot.

use std::path::PathBuf;

use burn_core as burn;

use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::checkpoint;
use crate::data::{BatchLoader, Datasets, Normalization};
use crate::metrics::classification_accuracy;
use crate::model::{AaeConfig, Networks, Variant};
use crate::phase::{StepLosses, TrainState};
use crate::schedule::LrSchedule;
use crate::{Error, Result};

/// Training run configuration.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub batch_size: usize,
    pub epochs: usize,
    /// Seeds initialization, dropout, prior samples and shuffling.
    pub seed: u64,
    /// Evaluate on epochs where `epoch % eval_every == 0`.
    pub eval_every: usize,
    pub schedule: LrSchedule,
    pub normalization: Normalization,
    pub model: AaeConfig,
    /// Where the final snapshot goes; `None` skips it.
    pub output_dir: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            epochs: 5000,
            seed: 10,
            eval_every: 10,
            schedule: LrSchedule::default(),
            normalization: Normalization::default(),
            model: AaeConfig::default(),
            output_dir: None,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.epochs == 0 || self.eval_every == 0 {
            return Err(Error::Domain("batch_size, epochs and eval_every must be >= 1"));
        }
        self.schedule.validate()?;
        self.model.validate()
    }
}

/// Per-epoch mean of every loss that was observed at least once.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochLosses {
    pub d_cat: Option<f32>,
    pub d_gauss: Option<f32>,
    pub generator: Option<f32>,
    pub reconstruction: Option<f32>,
    pub classification: Option<f32>,
}

#[derive(Debug, Default)]
struct Mean {
    sum: f64,
    n: usize,
}

impl Mean {
    fn push(&mut self, v: Option<f32>) {
        if let Some(v) = v {
            self.sum += v as f64;
            self.n += 1;
        }
    }

    fn get(&self) -> Option<f32> {
        (self.n > 0).then(|| (self.sum / self.n as f64) as f32)
    }
}

#[derive(Debug, Default)]
struct LossMeans {
    d_cat: Mean,
    d_gauss: Mean,
    generator: Mean,
    reconstruction: Mean,
    classification: Mean,
}

impl LossMeans {
    fn push(&mut self, s: &StepLosses) {
        self.d_cat.push(s.d_cat);
        self.d_gauss.push(s.d_gauss);
        self.generator.push(s.generator);
        self.reconstruction.push(s.reconstruction);
        self.classification.push(s.classification);
    }

    fn finish(&self) -> EpochLosses {
        EpochLosses {
            d_cat: self.d_cat.get(),
            d_gauss: self.d_gauss.get(),
            generator: self.generator.get(),
            reconstruction: self.reconstruction.get(),
            classification: self.classification.get(),
        }
    }
}

/// One evaluation epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalRecord {
    pub epoch: usize,
    pub losses: EpochLosses,
    /// Percent; `None` in the unsupervised variant.
    pub train_accuracy: Option<f64>,
    pub validation_accuracy: Option<f64>,
}

pub struct TrainReport<B: AutodiffBackend> {
    pub networks: Networks<B>,
    pub evals: Vec<EvalRecord>,
    pub last_epoch: EpochLosses,
}

fn show<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

/// Train from freshly initialized networks.
pub fn train<B: AutodiffBackend>(
    device: &B::Device,
    data: &Datasets,
    cfg: &TrainConfig,
) -> Result<TrainReport<B>> {
    cfg.validate()?;
    data.validate_dim(cfg.model.x_dim)?;

    let nets = Networks::<B>::new(device, &cfg.model, cfg.seed)?;
    let mut state = TrainState::new(
        device.clone(),
        nets,
        cfg.model.clone(),
        cfg.schedule.rates_at(0),
        cfg.seed,
    )?;
    let mut shuffle_rng = ChaCha8Rng::seed_from_u64(cfg.seed);
    shuffle_rng.set_stream(2);

    info!(
        labeled = data.labeled.len(),
        unlabeled = data.unlabeled.as_ref().map_or(0, |p| p.len()),
        validation = data.validation.len(),
        epochs = cfg.epochs,
        batch_size = cfg.batch_size,
        variant = ?cfg.model.variant,
        "training started"
    );

    let mut evals = Vec::new();
    let mut last_epoch = EpochLosses::default();
    for epoch in 0..cfg.epochs {
        let rates = cfg.schedule.rates_at(epoch);
        if rates != state.rates() {
            info!(epoch, ?rates, "learning rates changed, optimizers rebuilt");
            state.reset_optimizers(rates);
        }

        last_epoch = run_epoch(&mut state, data, cfg, &mut shuffle_rng)?;
        debug!(epoch, ?last_epoch, "epoch done");

        if epoch % cfg.eval_every == 0 {
            let record = evaluate(&state, data, cfg, epoch, last_epoch)?;
            let l = record.losses;
            info!(
                epoch,
                d_cat = %show(l.d_cat),
                d_gauss = %show(l.d_gauss),
                g = %show(l.generator),
                recon = %show(l.reconstruction),
                class = %show(l.classification),
                train_acc = %show(record.train_accuracy),
                val_acc = %show(record.validation_accuracy),
                "eval"
            );
            evals.push(record);
        }
    }

    let networks = state.into_networks();
    if let Some(dir) = cfg.output_dir.as_deref() {
        checkpoint::save(&networks, dir)?;
    }
    Ok(TrainReport {
        networks,
        evals,
        last_epoch,
    })
}

/// One pass over the data.
///
/// Semi-supervised: labeled and unlabeled loaders advance in lockstep (stopping at the shorter);
/// per step the unlabeled batch runs first, then the labeled one. Without an unlabeled partition,
/// a second shuffle of the labeled partition takes its place; its batches keep their labels and
/// so run the labeled plan.
///
/// Unsupervised: one loader over the unlabeled partition (or the labeled one when absent).
fn run_epoch<B: AutodiffBackend>(
    state: &mut TrainState<B>,
    data: &Datasets,
    cfg: &TrainConfig,
    rng: &mut ChaCha8Rng,
) -> Result<EpochLosses> {
    let norm = cfg.normalization;
    let mut means = LossMeans::default();
    let unlabeled_side = data.unlabeled.as_ref().unwrap_or(&data.labeled);
    match cfg.model.variant {
        Variant::SemiSupervised => {
            let labeled = BatchLoader::shuffled(&data.labeled, cfg.batch_size, rng)?;
            let unlabeled = BatchLoader::shuffled(unlabeled_side, cfg.batch_size, rng)?;
            debug!(
                steps = labeled.num_batches().min(unlabeled.num_batches()),
                "lockstep epoch"
            );
            for (u, l) in unlabeled.zip(labeled) {
                means.push(&state.step_batch(&u?, &norm)?);
                means.push(&state.step_batch(&l?, &norm)?);
            }
        }
        Variant::Unsupervised => {
            let loader = BatchLoader::shuffled(unlabeled_side, cfg.batch_size, rng)?;
            debug!(steps = loader.num_batches(), "autoencoder epoch");
            for batch in loader {
                means.push(&state.step_batch(&batch?, &norm)?);
            }
        }
    }
    Ok(means.finish())
}

fn evaluate<B: AutodiffBackend>(
    state: &TrainState<B>,
    data: &Datasets,
    cfg: &TrainConfig,
    epoch: usize,
    losses: EpochLosses,
) -> Result<EvalRecord> {
    let (train_accuracy, validation_accuracy) = if cfg.model.has_categorical() {
        let nets = state.networks().valid();
        let norm = &cfg.normalization;
        let device = state.device();
        (
            Some(classification_accuracy(&nets.encoder, &data.labeled, norm, device)?),
            Some(classification_accuracy(&nets.encoder, &data.validation, norm, device)?),
        )
    } else {
        (None, None)
    };
    Ok(EvalRecord {
        epoch,
        losses,
        train_accuracy,
        validation_accuracy,
    })
}
