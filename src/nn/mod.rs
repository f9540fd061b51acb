//! Neural network layers with explicit forward/backward passes
//!
//! Layers own their parameters as [`Param`] values (weight, gradient, and an
//! optional binary sparsity mask) and cache whatever activations the backward
//! pass needs. There is no tape: models call `forward`/`backward` on each
//! layer in order, and optimizers walk parameters through
//! [`visit`](crate::models::Network::visit_params) callbacks.

mod act;
mod conv;
mod linear;
mod loss;
mod norm;
mod pool;

pub use act::Relu;
pub use conv::Conv2d;
pub use linear::Linear;
pub use loss::CrossEntropyLoss;
pub use norm::BatchNorm2d;
pub use pool::{GlobalAvgPool, MaxPool2d};

use ndarray::ArrayD;

/// A tensor parameter with its gradient and optional sparsity mask
#[derive(Debug, Clone)]
pub struct Param {
    /// Parameter values
    pub w: ArrayD<f32>,
    /// Accumulated gradient, same shape as `w`
    pub grad: ArrayD<f32>,
    /// Binary mask; when present, `w` is kept elementwise-multiplied by it
    pub mask: Option<ArrayD<f32>>,
    /// Buffers (running statistics) set this to false and are skipped by
    /// optimizers
    pub trainable: bool,
}

impl Param {
    /// New trainable parameter with zeroed gradient
    pub fn new(w: ArrayD<f32>) -> Self {
        let grad = ArrayD::zeros(w.raw_dim());
        Self { w, grad, mask: None, trainable: true }
    }

    /// New non-trainable buffer (running mean/variance)
    pub fn buffer(w: ArrayD<f32>) -> Self {
        let mut p = Self::new(w);
        p.trainable = false;
        p
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    pub fn numel(&self) -> usize {
        self.w.len()
    }

    /// Install a mask and immediately zero out the masked weights
    pub fn set_mask(&mut self, mask: ArrayD<f32>) {
        self.mask = Some(mask);
        self.apply_mask();
    }

    /// Re-impose `w ⊙ mask`; no-op for unmasked parameters
    pub fn apply_mask(&mut self) {
        if let Some(mask) = &self.mask {
            self.w *= mask;
        }
    }

    /// Fraction of weights currently masked out (0.0 for unmasked params)
    pub fn sparsity(&self) -> f32 {
        match &self.mask {
            Some(mask) => {
                let kept: f32 = mask.sum();
                1.0 - kept / mask.len() as f32
            }
            None => 0.0,
        }
    }
}

/// Dotted parameter path, `prefix.name`, matching checkpoint keys
pub(crate) fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}
