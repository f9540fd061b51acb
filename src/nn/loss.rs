//! Classification loss

use ndarray::Array2;

/// Softmax cross-entropy, averaged over the batch
///
/// Returns the scalar loss and the logit gradient in one pass; the gradient
/// is `(softmax - onehot) / batch`.
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    pub fn new() -> Self {
        Self
    }

    pub fn forward(&self, logits: &Array2<f32>, target: &[usize]) -> (f32, Array2<f32>) {
        let n = logits.nrows();
        debug_assert_eq!(n, target.len());
        let mut dlogits = logits.clone();
        let mut loss = 0.0f32;

        for (mut row, &t) in dlogits.outer_iter_mut().zip(target.iter()) {
            let max = row.fold(f32::NEG_INFINITY, |a, &v| a.max(v));
            let mut sum = 0.0f32;
            for v in row.iter_mut() {
                *v = (*v - max).exp();
                sum += *v;
            }
            // row holds exp(logit - max), so row[t].ln() + max is the target logit
            let logit_t = row[t].ln() + max;
            loss += sum.ln() + max - logit_t;
            let inv = 1.0 / sum;
            for v in row.iter_mut() {
                *v *= inv;
            }
            row[t] -= 1.0;
        }

        let scale = 1.0 / n as f32;
        dlogits *= scale;
        (loss * scale, dlogits)
    }
}

impl Default for CrossEntropyLoss {
    fn default() -> Self {
        Self::new()
    }
}
