//! Stochastic Gradient Descent optimizer

use std::collections::HashMap;

use ndarray::ArrayD;

use super::Optimizer;
use crate::models::Network;

/// SGD with momentum, weight decay, and optional Nesterov update
///
/// Masked parameters stay masked: the gradient is projected through the
/// mask before the momentum update and the weights are re-masked after the
/// step, so momentum never resurrects a pruned weight.
pub struct Sgd {
    lr: f32,
    momentum: f32,
    weight_decay: f32,
    nesterov: bool,
    velocities: HashMap<String, ArrayD<f32>>,
}

impl Sgd {
    /// Create a new SGD optimizer
    pub fn new(lr: f32, momentum: f32, weight_decay: f32, nesterov: bool) -> Self {
        Self { lr, momentum, weight_decay, nesterov, velocities: HashMap::new() }
    }

    /// Momentum buffers keyed by parameter path, for checkpointing
    pub fn velocities(&self) -> &HashMap<String, ArrayD<f32>> {
        &self.velocities
    }

    /// Restore momentum buffers from a checkpoint
    pub fn set_velocities(&mut self, velocities: HashMap<String, ArrayD<f32>>) {
        self.velocities = velocities;
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, net: &mut dyn Network) {
        let (lr, momentum, weight_decay, nesterov) =
            (self.lr, self.momentum, self.weight_decay, self.nesterov);
        let velocities = &mut self.velocities;

        net.visit_params(&mut |name, p| {
            if !p.trainable {
                return;
            }
            let mut g = p.grad.clone();
            if let Some(mask) = &p.mask {
                g *= mask;
            }
            if weight_decay != 0.0 {
                g.scaled_add(weight_decay, &p.w);
            }

            if momentum != 0.0 {
                let v = velocities
                    .entry(name.to_string())
                    .or_insert_with(|| ArrayD::zeros(p.w.raw_dim()));
                v.zip_mut_with(&g, |vv, &gv| *vv = momentum * *vv + gv);
                if nesterov {
                    g.scaled_add(momentum, v);
                } else {
                    g.assign(v);
                }
            }

            p.w.scaled_add(-lr, &g);
            p.apply_mask();
        });
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}
