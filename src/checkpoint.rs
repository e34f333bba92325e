//! Parameter snapshots of the four networks.
//!
//! Each network is written to `<dir>/<name>.mpk` with burn's named MessagePack recorder at full
//! precision. `d_cat` is absent in the unsupervised variant.

use std::path::Path;

use burn_core as burn;

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use tracing::info;

use crate::model::{AaeConfig, Networks};
use crate::{Error, Result};

pub const ENCODER: &str = "q_encoder";
pub const DECODER: &str = "p_decoder";
pub const D_CAT: &str = "d_cat";
pub const D_GAUSS: &str = "d_gauss";

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

fn record_err(e: burn::record::RecorderError) -> Error {
    Error::Record(e.to_string())
}

pub fn save<B: Backend>(nets: &Networks<B>, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let rec = recorder();
    nets.encoder
        .clone()
        .save_file(dir.join(ENCODER), &rec)
        .map_err(record_err)?;
    nets.decoder
        .clone()
        .save_file(dir.join(DECODER), &rec)
        .map_err(record_err)?;
    if let Some(d_cat) = nets.d_cat.as_ref() {
        d_cat
            .clone()
            .save_file(dir.join(D_CAT), &rec)
            .map_err(record_err)?;
    }
    nets.d_gauss
        .clone()
        .save_file(dir.join(D_GAUSS), &rec)
        .map_err(record_err)?;
    info!(dir = %dir.display(), "saved network parameters");
    Ok(())
}

/// Restore networks shaped by `cfg` from `dir`.
pub fn load<B: Backend>(dir: &Path, cfg: &AaeConfig, device: &B::Device) -> Result<Networks<B>> {
    let rec = recorder();
    let skeleton = Networks::<B>::new(device, cfg, 0)?;
    let encoder = skeleton
        .encoder
        .load_file(dir.join(ENCODER), &rec, device)
        .map_err(record_err)?;
    let decoder = skeleton
        .decoder
        .load_file(dir.join(DECODER), &rec, device)
        .map_err(record_err)?;
    let d_cat = match skeleton.d_cat {
        Some(d) => Some(d.load_file(dir.join(D_CAT), &rec, device).map_err(record_err)?),
        None => None,
    };
    let d_gauss = skeleton
        .d_gauss
        .load_file(dir.join(D_GAUSS), &rec, device)
        .map_err(record_err)?;
    Ok(Networks {
        encoder,
        decoder,
        d_cat,
        d_gauss,
    })
}
