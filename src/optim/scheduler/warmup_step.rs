//! Warmup + milestone step decay scheduler

use super::LRScheduler;
use crate::optim::Optimizer;

/// Warmup + Step Decay Learning Rate Scheduler
///
/// The classic large-batch ImageNet schedule:
/// - Phase 1 (warmup): linear increase from 0 to base_lr over warmup
///   iterations
/// - Phase 2: base_lr multiplied by gamma once per passed epoch milestone
pub struct WarmupStepLr {
    base_lr: f32,
    gamma: f32,
    milestones: Vec<usize>,
    warmup_iters: usize,
    iters_per_epoch: usize,
    current_iter: usize,
}

impl WarmupStepLr {
    /// Create a new warmup + step decay scheduler
    ///
    /// # Arguments
    /// * `base_lr` - Learning rate after warmup
    /// * `milestones` - Epochs at which the rate decays (must be ascending)
    /// * `gamma` - Multiplicative decay factor (e.g. 0.1)
    /// * `warmup_epochs` - Epochs of linear warmup
    /// * `iters_per_epoch` - Training iterations per epoch
    pub fn new(
        base_lr: f32,
        milestones: Vec<usize>,
        gamma: f32,
        warmup_epochs: usize,
        iters_per_epoch: usize,
    ) -> Self {
        Self {
            base_lr,
            gamma,
            milestones,
            warmup_iters: warmup_epochs * iters_per_epoch,
            iters_per_epoch: iters_per_epoch.max(1),
            current_iter: 0,
        }
    }

    /// Apply the current learning rate to an optimizer
    pub fn apply<O: Optimizer>(&self, optimizer: &mut O) {
        optimizer.set_lr(self.get_lr());
    }

    /// Position the scheduler at the start of `epoch`, for resumed runs
    pub fn advance_to_epoch(&mut self, epoch: usize) {
        self.current_iter = epoch * self.iters_per_epoch;
    }
}

impl LRScheduler for WarmupStepLr {
    fn get_lr(&self) -> f32 {
        if self.current_iter < self.warmup_iters {
            let progress = self.current_iter as f32 / self.warmup_iters as f32;
            return self.base_lr * progress;
        }
        let epoch = self.current_iter / self.iters_per_epoch;
        let decays = self.milestones.iter().filter(|&&ms| epoch >= ms).count();
        self.base_lr * self.gamma.powi(decays as i32)
    }

    fn step(&mut self) {
        self.current_iter += 1;
    }
}
