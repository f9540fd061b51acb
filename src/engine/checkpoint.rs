//! Checkpoint capture, save, and restore
//!
//! A checkpoint is one JSON file carrying the full model state, the
//! optimizer momentum buffers, and the bookkeeping needed to resume:
//! the next epoch index and the best validation accuracy so far. Saving
//! goes through a temporary file and rename, so a crash mid-write leaves
//! the previous checkpoint intact. The best-so-far model is kept as a
//! separate copy.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::models::{export_state, import_state, Network};
use crate::optim::{Optimizer, Sgd};

pub const CHECKPOINT_FILE: &str = "checkpoint.json";
pub const BEST_FILE: &str = "model_best.json";

/// Errors from checkpoint persistence
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("checkpoint is for arch '{found}', run expects '{expected}'")]
    ArchMismatch { expected: String, found: String },

    #[error("tensor '{name}' has {len} values for shape {shape:?}")]
    Malformed { name: String, shape: Vec<usize>, len: usize },

    #[error(transparent)]
    State(#[from] crate::models::ModelError),
}

/// Result alias for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// A shaped f32 tensor in serializable form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorData {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorData {
    fn from_array(arr: &ArrayD<f32>) -> Self {
        Self { shape: arr.shape().to_vec(), data: arr.iter().copied().collect() }
    }

    fn into_array(self, name: &str) -> Result<ArrayD<f32>> {
        let shape = self.shape.clone();
        let len = self.data.len();
        ArrayD::from_shape_vec(ndarray::IxDyn(&self.shape), self.data)
            .map_err(|_| CheckpointError::Malformed { name: name.to_string(), shape, len })
    }
}

/// Optimizer state carried across restarts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerState {
    pub lr: f32,
    pub velocities: BTreeMap<String, TensorData>,
}

/// Everything needed to resume a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Next epoch to run
    pub epoch: usize,
    pub arch: String,
    pub state: BTreeMap<String, TensorData>,
    pub best_prec1: f32,
    pub optimizer: OptimizerState,
    pub saved_at: DateTime<Utc>,
}

/// Snapshot the model and optimizer after finishing `epoch`.
pub fn capture(
    net: &mut dyn Network,
    optimizer: &Sgd,
    epoch: usize,
    best_prec1: f32,
) -> Checkpoint {
    let state = export_state(net)
        .into_iter()
        .map(|(name, arr)| (name, TensorData::from_array(&arr)))
        .collect();
    let velocities = optimizer
        .velocities()
        .iter()
        .map(|(name, arr)| (name.clone(), TensorData::from_array(arr)))
        .collect();
    Checkpoint {
        epoch: epoch + 1,
        arch: net.arch().to_string(),
        state,
        best_prec1,
        optimizer: OptimizerState { lr: optimizer.lr(), velocities },
        saved_at: Utc::now(),
    }
}

/// Write `checkpoint.json` atomically; copy to `model_best.json` when best.
pub fn save_checkpoint(dir: &Path, checkpoint: &Checkpoint, is_best: bool) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(CHECKPOINT_FILE);
    let tmp = dir.join(format!("{CHECKPOINT_FILE}.tmp"));
    std::fs::write(&tmp, serde_json::to_vec(checkpoint)?)?;
    std::fs::rename(&tmp, &path)?;
    if is_best {
        std::fs::copy(&path, dir.join(BEST_FILE))?;
    }
    Ok(path)
}

/// Load the resume checkpoint from `dir` if one exists.
pub fn load_latest(dir: &Path) -> Result<Option<Checkpoint>> {
    let path = dir.join(CHECKPOINT_FILE);
    if !path.exists() {
        return Ok(None);
    }
    load_file(&path).map(Some)
}

/// Load a checkpoint from an explicit path.
pub fn load_file(path: &Path) -> Result<Checkpoint> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Restore model weights from a checkpoint, checking the architecture.
pub fn restore_weights(net: &mut dyn Network, checkpoint: &Checkpoint) -> Result<()> {
    if checkpoint.arch != net.arch() {
        return Err(CheckpointError::ArchMismatch {
            expected: net.arch().to_string(),
            found: checkpoint.arch.clone(),
        });
    }
    let mut state = BTreeMap::new();
    for (name, tensor) in &checkpoint.state {
        state.insert(name.clone(), tensor.clone().into_array(name)?);
    }
    import_state(net, &state)?;
    Ok(())
}

/// Restore model and optimizer; returns `(best_prec1, start_epoch)`.
pub fn restore(
    net: &mut dyn Network,
    optimizer: &mut Sgd,
    checkpoint: &Checkpoint,
) -> Result<(f32, usize)> {
    restore_weights(net, checkpoint)?;
    let mut velocities = HashMap::new();
    for (name, tensor) in &checkpoint.optimizer.velocities {
        velocities.insert(name.clone(), tensor.clone().into_array(name)?);
    }
    optimizer.set_velocities(velocities);
    optimizer.set_lr(checkpoint.optimizer.lr);
    Ok((checkpoint.best_prec1, checkpoint.epoch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::build_model;
    use tempfile::TempDir;

    #[test]
    fn test_save_restore_round_trip() {
        // TEST_ID: CKPT-001
        let dir = TempDir::new().unwrap();
        let mut net = build_model("convnet_nm", 4, 3).unwrap();
        let mut opt = Sgd::new(0.1, 0.9, 1e-4, false);

        // A step populates velocities so the optimizer state is non-trivial.
        net.visit_params(&mut |_, p| p.grad.fill(0.01));
        opt.step(net.as_mut());
        opt.set_lr(0.03);

        let ckpt = capture(net.as_mut(), &opt, 4, 61.25);
        save_checkpoint(dir.path(), &ckpt, true).unwrap();
        assert!(dir.path().join(CHECKPOINT_FILE).exists());
        assert!(dir.path().join(BEST_FILE).exists());

        let mut net2 = build_model("convnet_nm", 4, 99).unwrap();
        let mut opt2 = Sgd::new(0.1, 0.9, 1e-4, false);
        let loaded = load_latest(dir.path()).unwrap().unwrap();
        let (best, start) = restore(net2.as_mut(), &mut opt2, &loaded).unwrap();
        assert_eq!(start, 5, "CKPT-001 FALSIFIED: resume must continue after the saved epoch");
        assert_eq!(best, 61.25);
        assert_eq!(opt2.lr(), 0.03);

        let s1 = export_state(net.as_mut());
        let s2 = export_state(net2.as_mut());
        assert_eq!(s1, s2, "CKPT-001 FALSIFIED: weights must round-trip exactly");
        assert_eq!(opt.velocities().len(), opt2.velocities().len());
    }

    #[test]
    fn test_load_latest_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert!(load_latest(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_restore_rejects_wrong_arch() {
        // TEST_ID: CKPT-002
        let mut net = build_model("convnet_nm", 4, 3).unwrap();
        let opt = Sgd::new(0.1, 0.9, 0.0, false);
        let mut ckpt = capture(net.as_mut(), &opt, 0, 0.0);
        ckpt.arch = "resnet18_nm".to_string();
        assert!(
            matches!(restore_weights(net.as_mut(), &ckpt), Err(CheckpointError::ArchMismatch { .. })),
            "CKPT-002 FALSIFIED: arch mismatch must refuse to load"
        );
    }

    #[test]
    fn test_malformed_tensor_rejected() {
        let bad = TensorData { shape: vec![2, 3], data: vec![0.0; 5] };
        assert!(matches!(
            bad.into_array("fc.weight"),
            Err(CheckpointError::Malformed { len: 5, .. })
        ));
    }

    #[test]
    fn test_best_copy_only_when_best() {
        let dir = TempDir::new().unwrap();
        let mut net = build_model("convnet_nm", 4, 3).unwrap();
        let opt = Sgd::new(0.1, 0.9, 0.0, false);
        let ckpt = capture(net.as_mut(), &opt, 0, 10.0);
        save_checkpoint(dir.path(), &ckpt, false).unwrap();
        assert!(!dir.path().join(BEST_FILE).exists());
    }
}
