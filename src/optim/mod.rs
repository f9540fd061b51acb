//! Optimizers and learning rate schedules for training

mod optimizer;
mod scheduler;
mod sgd;

pub use optimizer::Optimizer;
pub use scheduler::{LRScheduler, WarmupCosineLr, WarmupStepLr};
pub use sgd::Sgd;
