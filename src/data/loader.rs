//! Background batch assembly
//!
//! A producer thread walks the sampled index sequence, decodes and augments
//! each batch with rayon, and hands finished tensors over a bounded channel.
//! Batches arrive in index order; dropping the loader stops the producer at
//! the next send.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use ndarray::{Array4, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use super::augment::Augment;
use super::{DataSource, Result};

const SAMPLE_MIX: u64 = 0xA076_1D64_78BD_642F;

/// One training batch: NCHW images and their labels
pub struct Batch {
    pub images: Array4<f32>,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Iterator over prefetched batches for one epoch
pub struct BatchLoader {
    rx: Option<mpsc::Receiver<Result<Batch>>>,
    handle: Option<JoinHandle<()>>,
}

impl BatchLoader {
    /// Start producing batches of `batch_size` over `indices`.
    ///
    /// `aug_seed` fixes the augmentation stream; pass a value derived from
    /// the run seed and epoch so crops differ across epochs but agree across
    /// reruns. `prefetch` bounds how many finished batches may sit in the
    /// channel.
    pub fn new(
        source: Arc<dyn DataSource>,
        indices: Vec<usize>,
        batch_size: usize,
        augment: Augment,
        aug_seed: u64,
        prefetch: usize,
    ) -> Self {
        assert!(batch_size > 0, "batch_size must be > 0");
        let (tx, rx) = mpsc::sync_channel(prefetch.max(1));
        let handle = std::thread::spawn(move || {
            for chunk in indices.chunks(batch_size) {
                let batch = assemble(source.as_ref(), chunk, augment, aug_seed);
                let failed = batch.is_err();
                if tx.send(batch).is_err() || failed {
                    break;
                }
            }
        });
        Self { rx: Some(rx), handle: Some(handle) }
    }
}

fn assemble(
    source: &dyn DataSource,
    chunk: &[usize],
    augment: Augment,
    aug_seed: u64,
) -> Result<Batch> {
    let samples: Result<Vec<_>> = chunk
        .par_iter()
        .map(|&idx| {
            let (img, label) = source.get(idx)?;
            let mut rng = StdRng::seed_from_u64(aug_seed ^ (idx as u64).wrapping_mul(SAMPLE_MIX));
            Ok((augment.apply(&img, &mut rng), label))
        })
        .collect();
    let samples = samples?;

    let side = augment.output_side();
    let mut images = Array4::zeros((samples.len(), 3, side, side));
    let mut labels = Vec::with_capacity(samples.len());
    for (i, (tensor, label)) in samples.into_iter().enumerate() {
        images.index_axis_mut(Axis(0), i).assign(&tensor);
        labels.push(label);
    }
    Ok(Batch { images, labels })
}

impl Iterator for BatchLoader {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.as_ref()?.recv().ok()
    }
}

impl Drop for BatchLoader {
    fn drop(&mut self) {
        self.rx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
