//! # podar
//!
//! Distributed supervised training of image-classification CNNs with
//! transposable N:M block sparsity.
//!
//! The crate drives epoch-based training of prunable convolutional networks
//! over one or more worker processes. A fixed sparsity mask with N nonzeros
//! per M-block, valid for both a weight matrix and its transpose, is computed
//! (or loaded) before training and re-applied after every optimizer step.
//!
//! # Architecture
//!
//! - **`config`**: YAML training spec + CLI override plumbing
//! - **`nn`**: layers with explicit forward/backward on ndarray buffers
//! - **`models`**: prunable CNN registry (`resnet18_nm`, `resnet34_nm`, ...)
//! - **`prune`**: transposable block-L1 mask computation and persistence
//! - **`optim`**: SGD with momentum/weight decay + LR schedules
//! - **`data`**: rank-sharded loaders over binary or synthetic datasets
//! - **`dist`**: TCP collectives (all-reduce, broadcast) and process launch
//! - **`engine`**: the train/validate loop, checkpointing, scalar logging
//!
//! # Example
//!
//! ```bash
//! podar train configs/resnet18_4by8.yaml --world-size 4
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod dist;
pub mod engine;
pub mod metrics;
pub mod models;
pub mod nn;
pub mod optim;
pub mod prune;

/// Top-level error type aggregating module errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("model error: {0}")]
    Model(#[from] models::ModelError),

    #[error("pruning error: {0}")]
    Prune(#[from] prune::PruneError),

    #[error("data error: {0}")]
    Data(#[from] data::DataError),

    #[error("distributed error: {0}")]
    Dist(#[from] dist::DistError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] engine::CheckpointError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;
