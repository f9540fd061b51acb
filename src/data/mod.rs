//! Datasets, augmentation, sharding, and batch loading
//!
//! The pipeline mirrors the classic ImageNet recipe: a [`DataSource`] decodes
//! raw RGB samples, an [`Augment`] pipeline crops and normalizes them into
//! CHW tensors, a [`ShardSampler`] deals indices out to distributed ranks,
//! and a [`BatchLoader`] assembles batches on a background thread.
//!
//! Two sources ship in-tree:
//!
//! - [`BinDataset`]: a packed record file of RGB images for real runs
//! - [`SyntheticDataset`]: procedurally generated class patterns for tests

mod augment;
mod bin;
mod image;
mod loader;
mod sampler;
mod synthetic;

pub use augment::Augment;
pub use bin::{BinDataset, BinWriter};
pub use image::RgbImage;
pub use loader::{Batch, BatchLoader};
pub use sampler::ShardSampler;
pub use synthetic::SyntheticDataset;

/// Per-channel normalization constants from the ImageNet training corpus
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Errors from dataset decoding and loading
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a dataset file: bad magic {0:?}")]
    BadMagic([u8; 8]),

    #[error("unsupported dataset version {0}")]
    BadVersion(u32),

    #[error("malformed record at offset {0}")]
    Truncated(u64),

    #[error("sample index {idx} out of range for dataset of {len}")]
    OutOfRange { idx: usize, len: usize },
}

/// Result alias for data operations
pub type Result<T> = std::result::Result<T, DataError>;

/// A decodable collection of labeled RGB images.
///
/// Sources are shared across loader threads, so decoding must be reentrant.
pub trait DataSource: Send + Sync {
    /// Number of samples
    fn len(&self) -> usize;

    /// True when the source holds no samples
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct labels the source can produce
    fn num_classes(&self) -> usize;

    /// Decode sample `idx` into an RGB image and its label
    fn get(&self, idx: usize) -> Result<(RgbImage, usize)>;
}
