use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn_core::tensor::backend::AutodiffBackend;
use clap::Parser;
use ndarray_npy::WriteNpyExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ssaae::data::Datasets;
use ssaae::generate::synthesize;
use ssaae::model::{AaeConfig, Variant};
use ssaae::schedule::LrSchedule;
use ssaae::train::{train, TrainConfig};

#[derive(Parser, Debug)]
#[command(version, about = "Semi-supervised adversarial autoencoder training")]
struct Cli {
    /// Samples per mini-batch; must divide every partition size.
    #[arg(long, default_value_t = 100)]
    batch_size: usize,
    #[arg(long, default_value_t = 5000)]
    epochs: usize,
    /// Disable the accelerator and train on the CPU.
    #[arg(long)]
    no_accel: bool,
    /// Directory holding `<partition>_images.npy` / `<partition>_labels.npy`.
    #[arg(long, default_value = "../data")]
    data_dir: PathBuf,
    /// Where the network snapshots (and synthesized samples) are written.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
    #[arg(long, default_value_t = 10)]
    seed: u64,
    #[arg(long, default_value_t = 10)]
    eval_every: usize,
    /// First epoch at the decayed learning rates.
    #[arg(long, default_value_t = 75)]
    decay_epoch: usize,
    /// Train the three-network variant without a categorical code (labels ignored).
    #[arg(long)]
    unsupervised: bool,
    /// After training, decode this many samples per class into `synthetic_samples.npy`.
    #[arg(long, value_name = "N")]
    synthesize: Option<usize>,
}

impl Cli {
    fn train_config(&self) -> TrainConfig {
        let variant = if self.unsupervised {
            Variant::Unsupervised
        } else {
            Variant::SemiSupervised
        };
        TrainConfig {
            batch_size: self.batch_size,
            epochs: self.epochs,
            seed: self.seed,
            eval_every: self.eval_every,
            schedule: LrSchedule {
                decay_epoch: self.decay_epoch,
                ..LrSchedule::default()
            },
            model: AaeConfig {
                variant,
                ..AaeConfig::default()
            },
            output_dir: Some(self.output_dir.clone()),
            ..TrainConfig::default()
        }
    }
}

fn run<B: AutodiffBackend>(device: B::Device, cli: &Cli) -> Result<()> {
    let cfg = cli.train_config();
    let data = Datasets::from_npy_dir(&cli.data_dir, cfg.model.n_classes)
        .with_context(|| format!("loading datasets from {}", cli.data_dir.display()))?;
    let report = train::<B>(&device, &data, &cfg).context("training failed")?;

    if let Some(per_class) = cli.synthesize.filter(|&n| n > 0) {
        let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
        rng.set_stream(3);
        let decoder = report.networks.valid().decoder;
        let samples = synthesize(&decoder, &cfg.model, per_class, &device, &mut rng)
            .context("synthesizing samples")?;
        write_samples(&cli.output_dir.join("synthetic_samples.npy"), &samples)?;
    }
    if let Some(last) = report.evals.last() {
        info!(epoch = last.epoch, val_acc = ?last.validation_accuracy, "training finished");
    }
    Ok(())
}

fn write_samples(path: &Path, samples: &ndarray::Array2<f32>) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    samples
        .write_npy(file)
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), rows = samples.nrows(), "wrote synthetic samples");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    dispatch(&cli)
}

/// Where training runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accel {
    Gpu,
    /// `fallback` is set when the accelerator was wanted but is not usable.
    Cpu { fallback: bool },
}

/// `adapter_found` is only consulted when the accelerator is both wanted and compiled in.
fn choose_accel(no_accel: bool, compiled: bool, adapter_found: impl FnOnce() -> bool) -> Accel {
    if no_accel {
        Accel::Cpu { fallback: false }
    } else if compiled && adapter_found() {
        Accel::Gpu
    } else {
        Accel::Cpu { fallback: true }
    }
}

fn dispatch(cli: &Cli) -> Result<()> {
    match choose_accel(cli.no_accel, cfg!(feature = "wgpu"), wgpu_available) {
        Accel::Gpu => {
            info!("using the wgpu backend");
            run_gpu(cli)
        }
        Accel::Cpu { fallback } => {
            if fallback {
                tracing::warn!("no usable wgpu adapter, training on the CPU");
            }
            run::<ssaae::BurnBackend>(Default::default(), cli)
        }
    }
}

/// Touch the default wgpu device once. burn panics when no adapter exists, so the panic is
/// caught and reported as `false` with the default hook silenced meanwhile.
#[cfg(feature = "wgpu")]
fn wgpu_available() -> bool {
    use burn_core::tensor::Tensor;

    let hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));
    let ok = std::panic::catch_unwind(|| {
        let device = burn_wgpu::WgpuDevice::default();
        Tensor::<burn_wgpu::Wgpu, 1>::zeros([1], &device).into_data()
    })
    .is_ok();
    std::panic::set_hook(hook);
    ok
}

#[cfg(not(feature = "wgpu"))]
fn wgpu_available() -> bool {
    false
}

#[cfg(feature = "wgpu")]
fn run_gpu(cli: &Cli) -> Result<()> {
    run::<burn_autodiff::Autodiff<burn_wgpu::Wgpu>>(Default::default(), cli)
}

#[cfg(not(feature = "wgpu"))]
fn run_gpu(cli: &Cli) -> Result<()> {
    run::<ssaae::BurnBackend>(Default::default(), cli)
}
