//! Learning rate schedulers
//!
//! Iteration-driven schedules for epoch-based training:
//! - `WarmupStepLr` - linear warmup, then decay by gamma at epoch milestones
//! - `WarmupCosineLr` - linear warmup, then cosine decay to a floor
//!
//! Schedulers count iterations, not epochs; constructors take the number of
//! iterations per epoch so milestone arithmetic stays in epoch units.

mod warmup_cosine;
mod warmup_step;

pub use warmup_cosine::WarmupCosineLr;
pub use warmup_step::WarmupStepLr;

/// Learning rate scheduler trait
pub trait LRScheduler {
    /// Get the current learning rate
    fn get_lr(&self) -> f32;

    /// Step the scheduler (called once per training iteration)
    fn step(&mut self);
}
