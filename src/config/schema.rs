//! YAML schema for training runs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::prune::PruningConfig;

/// Complete training specification
///
/// Every section has workable defaults except `model.arch`; a minimal config
/// is just:
///
/// ```yaml
/// model:
///   arch: resnet18_nm
/// data:
///   train: data/train.bin
///   val: data/val.bin
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainSpec {
    /// Architecture and class count
    pub model: ModelConfig,

    /// Dataset locations and loader shape
    #[serde(default)]
    pub data: DataConfig,

    /// SGD hyperparameters
    #[serde(default)]
    pub optimizer: OptimConfig,

    /// Learning rate schedule
    #[serde(default)]
    pub lr_schedule: ScheduleConfig,

    /// Transposable N:M sparsity settings
    #[serde(default)]
    pub sparsity: PruningConfig,

    /// Epochs, logging cadence, checkpoint directory
    #[serde(default)]
    pub training: TrainingParams,

    /// Process group topology
    #[serde(default)]
    pub distributed: DistConfig,
}

/// Model selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Registered architecture name (see `models::model_names`)
    pub arch: String,

    /// Number of output classes
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,

    /// Seed for weight init and data shuffling
    #[serde(default)]
    pub seed: u64,
}

/// Which dataset implementation backs a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// Packed record files named by `train` / `val`
    #[default]
    Packed,
    /// Procedural class patterns, no files needed
    Synthetic,
}

/// Dataset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub dataset: DatasetKind,

    /// Training split path (packed datasets)
    pub train: PathBuf,

    /// Validation split path (packed datasets)
    pub val: PathBuf,

    /// Global batch size, divided evenly across ranks
    pub batch_size: usize,

    /// Batches buffered ahead of the training step
    pub prefetch: usize,

    /// Train-time crop side and eval-time target side
    pub crop: usize,

    /// Eval-time shorter-side resize, applied before the center crop
    pub resize: usize,

    /// Synthetic split sizes, used when `dataset: synthetic`
    pub synthetic_train_len: usize,
    pub synthetic_val_len: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetKind::Packed,
            train: PathBuf::new(),
            val: PathBuf::new(),
            batch_size: 256,
            prefetch: 2,
            crop: 224,
            resize: 256,
            synthetic_train_len: 512,
            synthetic_val_len: 128,
        }
    }
}

/// SGD hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimConfig {
    /// Peak learning rate the schedule decays from
    pub base_lr: f32,

    pub momentum: f32,

    pub weight_decay: f32,

    pub nesterov: bool,
}

impl Default for OptimConfig {
    fn default() -> Self {
        Self { base_lr: 0.1, momentum: 0.9, weight_decay: 1e-4, nesterov: false }
    }
}

/// Learning rate decay policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePolicy {
    /// Multiply by `gamma` at each milestone epoch
    #[default]
    Step,
    /// Cosine decay from `base_lr` to `lr_min` over the full run
    Cosine,
}

/// Learning rate schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub policy: SchedulePolicy,

    /// Epochs at which step decay fires
    pub milestones: Vec<usize>,

    /// Step decay factor
    pub gamma: f32,

    /// Linear warmup length in epochs, from zero to `base_lr`
    pub warmup_epochs: usize,

    /// Cosine floor
    pub lr_min: f32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            policy: SchedulePolicy::Step,
            milestones: vec![30, 60, 90],
            gamma: 0.1,
            warmup_epochs: 0,
            lr_min: 0.0,
        }
    }
}

/// Run length, reporting cadence, and artifact locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    pub epochs: usize,

    /// Print and record train metrics every N iterations
    pub print_freq: usize,

    /// Checkpoints, masks, and scalar logs land here
    pub model_dir: PathBuf,

    /// Explicit checkpoint for `evaluate`; training auto-resumes from
    /// `model_dir` instead
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 100,
            print_freq: 10,
            model_dir: PathBuf::from("checkpoints"),
            checkpoint_path: None,
        }
    }
}

/// Process group topology
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistConfig {
    /// Total number of worker processes
    pub world_size: usize,

    /// Rendezvous address rank 0 listens on
    pub addr: String,

    /// How long workers wait for the chief before giving up
    pub rendezvous_timeout_secs: u64,
}

impl Default for DistConfig {
    fn default() -> Self {
        Self { world_size: 1, addr: "127.0.0.1:29500".to_string(), rendezvous_timeout_secs: 60 }
    }
}

fn default_num_classes() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_yaml_gets_defaults() {
        // TEST_ID: SCHEMA-001
        let spec: TrainSpec = serde_yaml::from_str("model:\n  arch: resnet18_nm\n").unwrap();
        assert_eq!(spec.model.arch, "resnet18_nm");
        assert_eq!(spec.model.num_classes, 1000);
        assert_eq!(spec.data.batch_size, 256);
        assert_eq!(spec.optimizer.base_lr, 0.1);
        assert_eq!(spec.lr_schedule.milestones, vec![30, 60, 90]);
        assert_eq!(spec.sparsity.n(), 4, "SCHEMA-001 FALSIFIED: default sparsity must be 4:8");
        assert_eq!(spec.distributed.world_size, 1);
    }

    #[test]
    fn test_full_yaml_round_trip() {
        let yaml = r#"
model:
  arch: convnet_nm
  num_classes: 10
  seed: 7
data:
  dataset: synthetic
  batch_size: 32
  crop: 16
  resize: 20
optimizer:
  base_lr: 0.05
  momentum: 0.8
  nesterov: true
lr_schedule:
  policy: cosine
  warmup_epochs: 2
  lr_min: 0.001
sparsity:
  n: 2
  m: 4
training:
  epochs: 3
  model_dir: /tmp/run
distributed:
  world_size: 2
  addr: 127.0.0.1:4000
"#;
        let spec: TrainSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.data.dataset, DatasetKind::Synthetic);
        assert_eq!(spec.lr_schedule.policy, SchedulePolicy::Cosine);
        assert_eq!((spec.sparsity.n(), spec.sparsity.m()), (2, 4));
        assert!(spec.optimizer.nesterov);

        let text = serde_yaml::to_string(&spec).unwrap();
        let back: TrainSpec = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back.distributed.world_size, 2);
        assert_eq!(back.training.epochs, 3);
    }
}
