//! Warmup + cosine decay scheduler

use std::f32::consts::PI;

use super::LRScheduler;
use crate::optim::Optimizer;

/// Warmup + Cosine Decay Learning Rate Scheduler
///
/// - Phase 1 (warmup): linear increase from 0 to base_lr
/// - Phase 2 (decay): cosine decay from base_lr to lr_min over the
///   remaining iterations
pub struct WarmupCosineLr {
    base_lr: f32,
    lr_min: f32,
    warmup_iters: usize,
    total_iters: usize,
    current_iter: usize,
}

impl WarmupCosineLr {
    /// Create a new warmup + cosine decay scheduler
    ///
    /// # Arguments
    /// * `base_lr` - Maximum learning rate (after warmup)
    /// * `lr_min` - Learning rate floor at the end of training
    /// * `warmup_iters` - Iterations of linear warmup
    /// * `total_iters` - Total training iterations including warmup
    pub fn new(base_lr: f32, lr_min: f32, warmup_iters: usize, total_iters: usize) -> Self {
        Self { base_lr, lr_min, warmup_iters, total_iters, current_iter: 0 }
    }

    /// Apply the current learning rate to an optimizer
    pub fn apply<O: Optimizer>(&self, optimizer: &mut O) {
        optimizer.set_lr(self.get_lr());
    }

    /// Position the scheduler at an absolute iteration, for resumed runs
    pub fn advance_to_iter(&mut self, iter: usize) {
        self.current_iter = iter;
    }
}

impl LRScheduler for WarmupCosineLr {
    fn get_lr(&self) -> f32 {
        if self.current_iter < self.warmup_iters {
            let progress = self.current_iter as f32 / self.warmup_iters as f32;
            return self.base_lr * progress;
        }

        let decay_iters = self.total_iters.saturating_sub(self.warmup_iters);
        if decay_iters == 0 {
            return self.lr_min;
        }
        let decay_iter = self.current_iter - self.warmup_iters;
        if decay_iter >= decay_iters {
            return self.lr_min;
        }

        let progress = decay_iter as f32 / decay_iters as f32;
        let cosine_decay = 0.5 * (1.0 + (PI * progress).cos());
        self.lr_min + (self.base_lr - self.lr_min) * cosine_decay
    }

    fn step(&mut self) {
        self.current_iter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_cosine_endpoints() {
        // TEST_ID: SCHED-003
        let mut sched = WarmupCosineLr::new(0.1, 0.001, 0, 100);
        assert_abs_diff_eq!(sched.get_lr(), 0.1, epsilon = 1e-6);
        for _ in 0..100 {
            sched.step();
        }
        assert_abs_diff_eq!(
            sched.get_lr(),
            0.001,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_cosine_midpoint() {
        let mut sched = WarmupCosineLr::new(0.1, 0.0, 0, 100);
        sched.advance_to_iter(50);
        assert_abs_diff_eq!(sched.get_lr(), 0.05, epsilon = 1e-4);
    }

    #[test]
    fn test_warmup_then_decay_monotonic_down() {
        let mut sched = WarmupCosineLr::new(0.1, 0.0, 10, 50);
        sched.advance_to_iter(10);
        let mut prev = sched.get_lr();
        for _ in 10..50 {
            sched.step();
            let lr = sched.get_lr();
            assert!(lr <= prev + 1e-7);
            prev = lr;
        }
    }

    #[test]
    fn test_past_end_clamps_to_floor() {
        let mut sched = WarmupCosineLr::new(0.1, 0.003, 5, 20);
        sched.advance_to_iter(1000);
        assert_abs_diff_eq!(sched.get_lr(), 0.003, epsilon = 1e-7);
    }
}
