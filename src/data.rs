//! Dataset partitions, homogeneous batches and seeded batch loaders.
//!
//! Labeled status lives in the partition, not in individual samples: a partition is either fully
//! labeled (labels in `[0, n_classes)`) or fully unlabeled (every label is [`UNLABELED`]). Batches
//! re-check this when they are built, so a mixed batch is an error rather than undefined behavior.
//!
//! On-disk format (one pair of files per partition `<name>`):
//! - `<name>_images.npy`: `f32`, shape `[n, x_dim]`
//! - `<name>_labels.npy`: `i64`, shape `[n]` (optional and ignored for the unlabeled partition)

use std::fs::File;
use std::path::Path;

use ndarray::{Array1, Array2, Axis};
use ndarray_npy::ReadNpyExt;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::{Error, Result};

/// Label sentinel for "no label".
pub const UNLABELED: i64 = -1;

pub const TRAIN_LABELED: &str = "train_labeled";
pub const TRAIN_UNLABELED: &str = "train_unlabeled";
pub const VALIDATION: &str = "validation";

/// Affine map applied to every batch before it reaches a network: `x * scale + shift`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub scale: f32,
    pub shift: f32,
}

impl Default for Normalization {
    /// Undoes the usual MNIST standardization (mean 0.1307, std 0.3081), mapping back to roughly
    /// `[0, 1]`.
    fn default() -> Self {
        Self {
            scale: 0.3081,
            shift: 0.1307,
        }
    }
}

impl Normalization {
    /// The identity map, for data already in `[0, 1]`.
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            shift: 0.0,
        }
    }

    pub fn apply(&self, x: &Array2<f32>) -> Array2<f32> {
        x.mapv(|v| v * self.scale + self.shift)
    }
}

/// Whether a batch (or partition) carries labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Labeled,
    Unlabeled,
}

/// A named, immutable set of samples with a single [`BatchKind`].
#[derive(Debug, Clone)]
pub struct Partition {
    name: String,
    images: Array2<f32>,
    labels: Vec<i64>,
    kind: BatchKind,
}

impl Partition {
    /// A labeled partition. Every label must lie in `[0, n_classes)`.
    pub fn labeled(
        name: impl Into<String>,
        images: Array2<f32>,
        labels: Vec<i64>,
        n_classes: usize,
    ) -> Result<Self> {
        if images.nrows() != labels.len() {
            return Err(Error::Shape("labels length must match images.nrows()"));
        }
        if labels.iter().any(|&y| y < 0 || y as usize >= n_classes) {
            return Err(Error::Domain("labeled partition has labels outside [0, n_classes)"));
        }
        Ok(Self {
            name: name.into(),
            images,
            labels,
            kind: BatchKind::Labeled,
        })
    }

    /// An unlabeled partition; every sample gets the [`UNLABELED`] sentinel.
    pub fn unlabeled(name: impl Into<String>, images: Array2<f32>) -> Self {
        let labels = vec![UNLABELED; images.nrows()];
        Self {
            name: name.into(),
            images,
            labels,
            kind: BatchKind::Unlabeled,
        }
    }

    /// Load `<dir>/<name>_images.npy` (and `<name>_labels.npy` when `kind` is labeled).
    pub fn from_npy_dir(
        dir: &Path,
        name: &str,
        kind: BatchKind,
        n_classes: usize,
    ) -> Result<Self> {
        let images_path = dir.join(format!("{name}_images.npy"));
        let images = Array2::<f32>::read_npy(File::open(&images_path)?)
            .map_err(|e| Error::Npy(format!("{}: {e}", images_path.display())))?;
        debug!(partition = name, rows = images.nrows(), cols = images.ncols(), "loaded images");
        match kind {
            BatchKind::Unlabeled => Ok(Self::unlabeled(name, images)),
            BatchKind::Labeled => {
                let labels_path = dir.join(format!("{name}_labels.npy"));
                let labels = Array1::<i64>::read_npy(File::open(&labels_path)?)
                    .map_err(|e| Error::Npy(format!("{}: {e}", labels_path.display())))?;
                Self::labeled(name, images, labels.to_vec(), n_classes)
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Sample dimensionality.
    pub fn dim(&self) -> usize {
        self.images.ncols()
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn images(&self) -> &Array2<f32> {
        &self.images
    }

    pub fn labels(&self) -> &[i64] {
        &self.labels
    }
}

/// A fixed-size, homogeneous batch.
#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Array2<f32>,
    pub labels: Vec<i64>,
    kind: BatchKind,
}

impl Batch {
    /// Build a batch, rejecting empty batches and batches that mix [`UNLABELED`] with labels.
    pub fn new(images: Array2<f32>, labels: Vec<i64>) -> Result<Self> {
        if images.nrows() != labels.len() {
            return Err(Error::Shape("labels length must match images.nrows()"));
        }
        if labels.is_empty() {
            return Err(Error::Domain("batch must be non-empty"));
        }
        let unlabeled = labels.iter().filter(|&&y| y == UNLABELED).count();
        let labeled = labels.len() - unlabeled;
        let kind = match (labeled, unlabeled) {
            (_, 0) => BatchKind::Labeled,
            (0, _) => BatchKind::Unlabeled,
            (labeled, unlabeled) => return Err(Error::MixedBatch { labeled, unlabeled }),
        };
        if kind == BatchKind::Labeled && labels.iter().any(|&y| y < 0) {
            return Err(Error::Domain("labels must be >= 0 or the UNLABELED sentinel"));
        }
        Ok(Self {
            images,
            labels,
            kind,
        })
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Class indices of a labeled batch.
    pub fn classes(&self) -> Result<Vec<usize>> {
        match self.kind {
            BatchKind::Labeled => Ok(self.labels.iter().map(|&y| y as usize).collect()),
            BatchKind::Unlabeled => Err(Error::Domain("unlabeled batch has no classes")),
        }
    }
}

/// Iterates a partition in batches of exactly `batch_size` samples, without replacement.
#[derive(Debug)]
pub struct BatchLoader<'a> {
    partition: &'a Partition,
    order: Vec<usize>,
    batch_size: usize,
    pos: usize,
}

impl<'a> BatchLoader<'a> {
    /// Partition order.
    pub fn sequential(partition: &'a Partition, batch_size: usize) -> Result<Self> {
        check_batch_size(partition, batch_size)?;
        Ok(Self {
            partition,
            order: (0..partition.len()).collect(),
            batch_size,
            pos: 0,
        })
    }

    /// A fresh permutation drawn from `rng`.
    pub fn shuffled(
        partition: &'a Partition,
        batch_size: usize,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let mut loader = Self::sequential(partition, batch_size)?;
        loader.order.shuffle(rng);
        Ok(loader)
    }

    pub fn num_batches(&self) -> usize {
        self.order.len() / self.batch_size
    }
}

fn check_batch_size(partition: &Partition, batch_size: usize) -> Result<()> {
    if batch_size == 0 || partition.is_empty() || partition.len() % batch_size != 0 {
        return Err(Error::BatchSize {
            partition: partition.name().to_string(),
            len: partition.len(),
            batch_size,
        });
    }
    Ok(())
}

impl Iterator for BatchLoader<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.order.len() {
            return None;
        }
        let idx = &self.order[self.pos..self.pos + self.batch_size];
        self.pos += self.batch_size;
        let images = self.partition.images.select(Axis(0), idx);
        let labels = idx.iter().map(|&i| self.partition.labels[i]).collect();
        Some(Batch::new(images, labels))
    }
}

/// The three partitions a training run consumes.
#[derive(Debug, Clone)]
pub struct Datasets {
    pub labeled: Partition,
    /// When absent, a second pass over `labeled` stands in for it.
    pub unlabeled: Option<Partition>,
    pub validation: Partition,
}

impl Datasets {
    /// Load all partitions from `dir`. A missing unlabeled images file means "no unlabeled data".
    pub fn from_npy_dir(dir: &Path, n_classes: usize) -> Result<Self> {
        let labeled = Partition::from_npy_dir(dir, TRAIN_LABELED, BatchKind::Labeled, n_classes)?;
        let unlabeled = if dir.join(format!("{TRAIN_UNLABELED}_images.npy")).exists() {
            Some(Partition::from_npy_dir(
                dir,
                TRAIN_UNLABELED,
                BatchKind::Unlabeled,
                n_classes,
            )?)
        } else {
            debug!(dir = %dir.display(), "no unlabeled partition on disk");
            None
        };
        let validation = Partition::from_npy_dir(dir, VALIDATION, BatchKind::Labeled, n_classes)?;
        Ok(Self {
            labeled,
            unlabeled,
            validation,
        })
    }

    /// Check every partition has `x_dim` columns.
    pub fn validate_dim(&self, x_dim: usize) -> Result<()> {
        let parts = [Some(&self.labeled), self.unlabeled.as_ref(), Some(&self.validation)];
        if parts.iter().flatten().any(|p| p.dim() != x_dim) {
            return Err(Error::Shape("partition width must equal x_dim"));
        }
        Ok(())
    }
}
