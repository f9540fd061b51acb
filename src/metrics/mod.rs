//! Running meters and classification accuracy
//!
//! `AverageMeter` tracks the latest value and running average of a scalar
//! (loss, batch time, precision). `topk_accuracy` computes top-k precision
//! in percent for a batch of logits.

use ndarray::Array2;

/// Tracks current value, running sum, and average of a scalar metric
#[derive(Debug, Clone, Copy, Default)]
pub struct AverageMeter {
    /// Most recent value
    pub val: f32,
    /// Running average over all updates
    pub avg: f32,
    sum: f32,
    count: usize,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all statistics to zero
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record `val` weighted by `n` samples
    pub fn update(&mut self, val: f32, n: usize) {
        self.val = val;
        self.sum += val * n as f32;
        self.count += n;
        if self.count > 0 {
            self.avg = self.sum / self.count as f32;
        }
    }

    /// Total number of weighted samples recorded
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Top-k precision in percent for each `k` in `ks`.
///
/// `output` is `(batch, classes)` logits; `target` holds one class index per
/// row. A row counts as correct at `k` if its target class is among the `k`
/// highest logits.
pub fn topk_accuracy(output: &Array2<f32>, target: &[usize], ks: &[usize]) -> Vec<f32> {
    let batch = output.nrows();
    if batch == 0 || ks.is_empty() {
        return vec![0.0; ks.len()];
    }
    let maxk = ks.iter().copied().max().unwrap_or(1);

    // Rank of the target class within each row's top-maxk predictions,
    // or None if it is not there at all.
    let mut ranks: Vec<Option<usize>> = Vec::with_capacity(batch);
    let mut order: Vec<usize> = Vec::new();
    for (row, &t) in output.outer_iter().zip(target.iter()) {
        order.clear();
        order.extend(0..row.len());
        order.sort_unstable_by(|&a, &b| row[b].total_cmp(&row[a]));
        ranks.push(order.iter().take(maxk).position(|&c| c == t));
    }

    ks.iter()
        .map(|&k| {
            let correct = ranks.iter().filter(|r| matches!(r, Some(p) if *p < k)).count();
            correct as f32 * 100.0 / batch as f32
        })
        .collect()
}
