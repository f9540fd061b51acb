//! Run configuration: YAML schema, loading, validation
//!
//! A run is described by one YAML file parsed into [`TrainSpec`]. CLI flags
//! may override individual fields after parsing; [`validate`] runs last so
//! it sees the effective configuration.

mod cli;
mod schema;

pub use cli::{
    apply_overrides, forward_args, parse_args, Cli, Command, EvaluateArgs, InfoArgs, OutputFormat,
    PruneArgs, TrainArgs,
};
pub use schema::{
    DataConfig, DatasetKind, DistConfig, ModelConfig, OptimConfig, SchedulePolicy, ScheduleConfig,
    TrainSpec, TrainingParams,
};

use std::path::Path;

/// Errors from loading or validating a run configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Read and parse a YAML run spec; validation is a separate step.
pub fn load_spec(path: &Path) -> Result<TrainSpec> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
    Ok(serde_yaml::from_str(&text)?)
}

/// Check cross-field consistency of the effective configuration.
pub fn validate(spec: &TrainSpec) -> Result<()> {
    if !crate::models::model_names().contains(&spec.model.arch.as_str()) {
        return Err(ConfigError::Invalid(format!(
            "unknown arch '{}', expected one of {}",
            spec.model.arch,
            crate::models::model_names().join(", ")
        )));
    }
    if spec.model.num_classes == 0 {
        return Err(ConfigError::Invalid("num_classes must be > 0".to_string()));
    }

    spec.sparsity.validate().map_err(|e| ConfigError::Invalid(e.to_string()))?;

    let world = spec.distributed.world_size;
    if world == 0 {
        return Err(ConfigError::Invalid("world_size must be > 0".to_string()));
    }
    if spec.data.batch_size < world {
        return Err(ConfigError::Invalid(format!(
            "global batch size {} cannot feed {world} ranks",
            spec.data.batch_size
        )));
    }
    if spec.data.crop == 0 || spec.data.resize < spec.data.crop {
        return Err(ConfigError::Invalid(format!(
            "need 0 < crop <= resize, got crop {} resize {}",
            spec.data.crop, spec.data.resize
        )));
    }
    if spec.data.dataset == DatasetKind::Packed {
        for (split, path) in [("train", &spec.data.train), ("val", &spec.data.val)] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "data.{split} is required for packed datasets"
                )));
            }
        }
    }

    if spec.training.epochs == 0 {
        return Err(ConfigError::Invalid("epochs must be > 0".to_string()));
    }
    if spec.training.print_freq == 0 {
        return Err(ConfigError::Invalid("print_freq must be > 0".to_string()));
    }

    let ms = &spec.lr_schedule.milestones;
    if !ms.windows(2).all(|w| w[0] < w[1]) {
        return Err(ConfigError::Invalid("milestones must be strictly increasing".to_string()));
    }
    if spec.lr_schedule.gamma <= 0.0 {
        return Err(ConfigError::Invalid("gamma must be > 0".to_string()));
    }
    if spec.optimizer.base_lr <= 0.0 {
        return Err(ConfigError::Invalid("base_lr must be > 0".to_string()));
    }

    Ok(())
}
