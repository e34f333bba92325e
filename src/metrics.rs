//! Evaluation utilities (eval mode, no parameter updates).
//!
//! These run on any backend; during training they are called on the inner backend via
//! [`Networks::valid`](crate::model::Networks::valid), so no autodiff graph is built.
//!
//! Partitions are processed in chunks of [`EVAL_CHUNK`] rows; the last chunk may be shorter.

use burn_core as burn;

use burn::tensor::backend::Backend;
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::data::{BatchKind, Normalization, Partition};
use crate::decoder::Decoder;
use crate::encoder::{Codes, Encoder};
use crate::layers::{burn_to_ndarray_2, ndarray_to_burn_2, scalar, Mode};
use crate::simplex::argmax_rows;
use crate::{loss, Error, Result};

pub const EVAL_CHUNK: usize = 500;

// Eval mode never draws from it.
fn eval_rng() -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(0)
}

fn encode_chunk<B: Backend>(
    encoder: &Encoder<B>,
    x: &ArrayView2<f32>,
    norm: &Normalization,
    device: &B::Device,
) -> Codes<B> {
    let x = ndarray_to_burn_2(device, &norm.apply(&x.to_owned()));
    encoder.forward(x, Mode::Eval, &mut eval_rng())
}

/// Percentage (in `[0, 100]`) of samples whose arg-max categorical code equals the label.
pub fn classification_accuracy<B: Backend>(
    encoder: &Encoder<B>,
    partition: &Partition,
    norm: &Normalization,
    device: &B::Device,
) -> Result<f64> {
    if partition.kind() != BatchKind::Labeled {
        return Err(Error::Domain("accuracy needs a labeled partition"));
    }
    if partition.is_empty() {
        return Err(Error::Domain("accuracy of an empty partition"));
    }
    let mut correct = 0usize;
    let chunks = partition.images().axis_chunks_iter(Axis(0), EVAL_CHUNK);
    for (chunk, labels) in chunks.zip(partition.labels().chunks(EVAL_CHUNK)) {
        let cat = encode_chunk(encoder, &chunk, norm, device)
            .cat
            .ok_or(Error::Domain("accuracy needs a categorical head"))?;
        let pred = argmax_rows(&burn_to_ndarray_2(cat)?.view());
        correct += pred
            .iter()
            .zip(labels)
            .filter(|&(&p, &y)| p as i64 == y)
            .count();
    }
    Ok(100.0 * correct as f64 / partition.len() as f64)
}

/// Eval-mode latent codes (continuous ⧺ categorical) of every sample, in partition order,
/// alongside the partition's labels.
pub fn latent_codes<B: Backend>(
    encoder: &Encoder<B>,
    partition: &Partition,
    norm: &Normalization,
    device: &B::Device,
) -> Result<(Array2<f32>, Vec<i64>)> {
    let mut parts = Vec::new();
    for chunk in partition.images().axis_chunks_iter(Axis(0), EVAL_CHUNK) {
        let z = encode_chunk(encoder, &chunk, norm, device).latent();
        parts.push(burn_to_ndarray_2(z)?);
    }
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    let codes = concatenate(Axis(0), &views).map_err(|_| Error::Shape("empty partition"))?;
    Ok((codes, partition.labels().to_vec()))
}

/// Mean eval-mode reconstruction BCE over `images` (normalized first).
pub fn reconstruction_loss<B: Backend>(
    encoder: &Encoder<B>,
    decoder: &Decoder<B>,
    images: &Array2<f32>,
    norm: &Normalization,
    device: &B::Device,
) -> Result<f32> {
    if images.nrows() == 0 {
        return Err(Error::Domain("images must be non-empty"));
    }
    let mut total = 0.0f64;
    for chunk in images.axis_chunks_iter(Axis(0), EVAL_CHUNK) {
        let x = ndarray_to_burn_2::<B>(device, &norm.apply(&chunk.to_owned()));
        let mut rng = eval_rng();
        let z = encoder.forward(x.clone(), Mode::Eval, &mut rng).latent();
        let p = decoder.forward(z, Mode::Eval, &mut rng);
        total += scalar(&loss::reconstruction(p, x)) as f64 * chunk.nrows() as f64;
    }
    Ok((total / images.nrows() as f64) as f32)
}
