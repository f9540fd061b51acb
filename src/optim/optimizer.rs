//! Optimizer trait

use crate::models::Network;

/// Trait for optimization algorithms
///
/// Optimizers walk a model's parameters through
/// [`visit_params`](Network::visit_params) on every call, so they hold no
/// references into the model between steps. Per-parameter state is keyed by
/// the dotted parameter path.
pub trait Optimizer {
    /// Perform a single optimization step over all trainable parameters
    fn step(&mut self, net: &mut dyn Network);

    /// Zero out all gradients
    fn zero_grad(&mut self, net: &mut dyn Network) {
        net.visit_params(&mut |_, p| p.zero_grad());
    }

    /// Get learning rate
    fn lr(&self) -> f32;

    /// Set learning rate
    fn set_lr(&mut self, lr: f32);
}
