//! The training driver: wiring config, model, masks, data, and workers
//!
//! [`run_training`] is what a single rank executes end to end:
//!
//! 1. join the process group (a no-op for a world of one)
//! 2. build the model and install sparsity masks (computed or loaded)
//! 3. create the optimizer and auto-resume from the run directory
//! 4. broadcast rank 0's weights so every worker starts identically
//! 5. loop epochs: train, validate, track the best top-1, checkpoint
//!
//! [`run_evaluate`] loads an explicit checkpoint and runs validation only.

mod checkpoint;
mod epoch;
mod scalars;

pub use checkpoint::{
    capture, load_file, load_latest, restore, restore_weights, save_checkpoint, Checkpoint,
    CheckpointError, OptimizerState, TensorData, BEST_FILE, CHECKPOINT_FILE,
};
pub use scalars::{read_scalars, ScalarEvent, ScalarWriter, SCALARS_FILE};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::config::{ConfigError, DatasetKind, SchedulePolicy, TrainSpec};
use crate::data::{Augment, BatchLoader, BinDataset, DataSource, ShardSampler, SyntheticDataset};
use crate::dist::Collective;
use crate::models::{build_model, flatten_state, load_state, param_count, Network};
use crate::nn::CrossEntropyLoss;
use crate::optim::{LRScheduler, Sgd, WarmupCosineLr, WarmupStepLr};
use crate::prune::{apply_masks, compute_model_masks, load_masks, save_masks, PruningConfig};

use epoch::{TrainEpoch, ValidateEpoch};

pub const MASK_FILE: &str = "mask.json";

const EPOCH_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Learning rate schedule selected by the run config
pub(crate) enum Schedule {
    Step(WarmupStepLr),
    Cosine(WarmupCosineLr),
}

impl Schedule {
    fn from_spec(spec: &TrainSpec, niters: usize) -> Self {
        let sched = &spec.lr_schedule;
        match sched.policy {
            SchedulePolicy::Step => Schedule::Step(WarmupStepLr::new(
                spec.optimizer.base_lr,
                sched.milestones.clone(),
                sched.gamma,
                sched.warmup_epochs,
                niters,
            )),
            SchedulePolicy::Cosine => Schedule::Cosine(WarmupCosineLr::new(
                spec.optimizer.base_lr,
                sched.lr_min,
                sched.warmup_epochs * niters,
                spec.training.epochs * niters,
            )),
        }
    }

    fn advance_to_epoch(&mut self, epoch: usize, niters: usize) {
        match self {
            Schedule::Step(s) => s.advance_to_epoch(epoch),
            Schedule::Cosine(s) => s.advance_to_iter(epoch * niters),
        }
    }

    pub(crate) fn get_lr(&self) -> f32 {
        match self {
            Schedule::Step(s) => s.get_lr(),
            Schedule::Cosine(s) => s.get_lr(),
        }
    }

    pub(crate) fn step(&mut self) {
        match self {
            Schedule::Step(s) => s.step(),
            Schedule::Cosine(s) => s.step(),
        }
    }
}

fn epoch_seed(seed: u64, epoch: usize) -> u64 {
    seed ^ (epoch as u64).wrapping_mul(EPOCH_MIX)
}

/// Install transposable masks: load them when the mask file exists,
/// otherwise compute from the current weights and let the chief save.
fn apply_sparsity(
    net: &mut dyn Network,
    config: &PruningConfig,
    model_dir: &Path,
    chief: bool,
) -> crate::Result<()> {
    let mask_path =
        config.mask_file().cloned().unwrap_or_else(|| model_dir.join(MASK_FILE));
    let masks = if mask_path.exists() {
        let loaded = load_masks(&mask_path)?;
        if chief {
            println!("Masks loaded!");
        }
        loaded
    } else {
        let computed = compute_model_masks(net, config)?;
        if chief {
            save_masks(&mask_path, &computed, config.n(), config.m())?;
            println!("Masks saved!");
        }
        computed
    };
    let report = apply_masks(net, &masks)?;
    if chief {
        info!(
            "{}:{} masks on {} layers, overall sparsity {:.1}%",
            config.n(),
            config.m(),
            report.layers.len(),
            report.overall_sparsity() * 100.0
        );
    }
    Ok(())
}

fn build_sources(
    spec: &TrainSpec,
) -> crate::Result<(Arc<dyn DataSource>, Arc<dyn DataSource>)> {
    match spec.data.dataset {
        DatasetKind::Packed => {
            let train = BinDataset::open(&spec.data.train)?;
            let val = BinDataset::open(&spec.data.val)?;
            Ok((Arc::new(train), Arc::new(val)))
        }
        DatasetKind::Synthetic => {
            let side = spec.data.resize;
            let classes = spec.model.num_classes;
            let train = SyntheticDataset::new(
                spec.data.synthetic_train_len,
                classes,
                side,
                spec.model.seed,
            );
            let val = SyntheticDataset::new(
                spec.data.synthetic_val_len,
                classes,
                side,
                spec.model.seed.wrapping_add(1),
            );
            Ok((Arc::new(train), Arc::new(val)))
        }
    }
}

/// Execute the full training run for one rank.
pub fn run_training(spec: &TrainSpec, rank: usize) -> crate::Result<()> {
    let world = spec.distributed.world_size;
    let timeout = Duration::from_secs(spec.distributed.rendezvous_timeout_secs);
    let mut collective = Collective::connect(rank, world, &spec.distributed.addr, timeout)?;
    let chief = collective.is_chief();
    let model_dir = spec.training.model_dir.clone();
    if chief {
        std::fs::create_dir_all(&model_dir)?;
    }

    if chief {
        println!("=> creating model '{}'", spec.model.arch);
    }
    let mut net = build_model(&spec.model.arch, spec.model.num_classes, spec.model.seed)?;
    if chief {
        let (trainable, total) = param_count(net.as_mut());
        info!("model '{}': {trainable} trainable of {total} parameters", spec.model.arch);
    }

    apply_sparsity(net.as_mut(), &spec.sparsity, &model_dir, chief)?;

    let mut optimizer = Sgd::new(
        spec.optimizer.base_lr,
        spec.optimizer.momentum,
        spec.optimizer.weight_decay,
        spec.optimizer.nesterov,
    );

    let (mut best_prec1, start_epoch) = match load_latest(&model_dir)? {
        Some(ckpt) => {
            let resumed = restore(net.as_mut(), &mut optimizer, &ckpt)?;
            if chief {
                println!(
                    "=> resumed from epoch {} (best Prec@1 {:.3})",
                    ckpt.epoch, ckpt.best_prec1
                );
            }
            resumed
        }
        None => (0.0, 0),
    };

    // Every rank proceeds from rank 0's weights, covering both fresh init
    // drift (there is none while seeds agree) and resume races.
    let mut state = Vec::new();
    flatten_state(net.as_mut(), &mut state);
    collective.broadcast(&mut state)?;
    load_state(net.as_mut(), &state);

    let (train_src, val_src) = build_sources(spec)?;
    if chief && train_src.num_classes() != spec.model.num_classes {
        warn!(
            "dataset reports {} classes, model has {}",
            train_src.num_classes(),
            spec.model.num_classes
        );
    }

    let per_rank_batch = spec.data.batch_size / world;
    let mut train_sampler =
        ShardSampler::new(train_src.len(), world, rank, true, spec.model.seed);
    let val_sampler = ShardSampler::new(val_src.len(), world, rank, false, spec.model.seed);
    let niters = train_sampler.per_rank_len().div_ceil(per_rank_batch);
    let val_niters = val_sampler.per_rank_len().div_ceil(per_rank_batch);

    let mut schedule = Schedule::from_spec(spec, niters);
    schedule.advance_to_epoch(start_epoch, niters);

    let mut writer = if chief { Some(ScalarWriter::create(&model_dir)?) } else { None };
    let criterion = CrossEntropyLoss::new();

    let train_aug = Augment::Train { crop: spec.data.crop };
    let eval_aug = Augment::Eval { resize: spec.data.resize, crop: spec.data.crop };

    for epoch in start_epoch..spec.training.epochs {
        train_sampler.set_epoch(epoch);
        let train_loader = BatchLoader::new(
            train_src.clone(),
            train_sampler.indices(),
            per_rank_batch,
            train_aug,
            epoch_seed(spec.model.seed, epoch),
            spec.data.prefetch,
        );
        TrainEpoch {
            net: net.as_mut(),
            criterion: &criterion,
            optimizer: &mut optimizer,
            schedule: &mut schedule,
            collective: &mut collective,
            writer: writer.as_mut(),
            epoch,
            niters,
            print_freq: spec.training.print_freq,
        }
        .run(train_loader)?;

        let val_loader = BatchLoader::new(
            val_src.clone(),
            val_sampler.indices(),
            per_rank_batch,
            eval_aug,
            0,
            spec.data.prefetch,
        );
        let prec1 = ValidateEpoch {
            net: net.as_mut(),
            criterion: &criterion,
            collective: &mut collective,
            writer: writer.as_mut(),
            epoch,
            niters: val_niters,
            print_freq: spec.training.print_freq,
        }
        .run(val_loader)?;

        let is_best = prec1 > best_prec1;
        best_prec1 = best_prec1.max(prec1);
        if chief {
            let ckpt = capture(net.as_mut(), &optimizer, epoch, best_prec1);
            save_checkpoint(&model_dir, &ckpt, is_best)?;
        }
    }

    collective.barrier()?;
    Ok(())
}

/// Load the configured checkpoint and run validation once, single process.
pub fn run_evaluate(spec: &TrainSpec) -> crate::Result<f32> {
    let path = spec.training.checkpoint_path.clone().ok_or_else(|| {
        ConfigError::Invalid("training.checkpoint_path is required for evaluate".to_string())
    })?;

    println!("=> creating model '{}'", spec.model.arch);
    let mut net = build_model(&spec.model.arch, spec.model.num_classes, spec.model.seed)?;
    let ckpt = load_file(&path)?;
    restore_weights(net.as_mut(), &ckpt)?;
    println!("=> loaded checkpoint '{}' (epoch {})", path.display(), ckpt.epoch);

    let (_, val_src) = build_sources(spec)?;
    let val_sampler = ShardSampler::new(val_src.len(), 1, 0, false, spec.model.seed);
    let val_niters = val_sampler.per_rank_len().div_ceil(spec.data.batch_size);
    let val_loader = BatchLoader::new(
        val_src,
        val_sampler.indices(),
        spec.data.batch_size,
        Augment::Eval { resize: spec.data.resize, crop: spec.data.crop },
        0,
        spec.data.prefetch,
    );

    let mut writer = ScalarWriter::create(&spec.training.model_dir)?;
    let mut collective = Collective::Single;
    let criterion = CrossEntropyLoss::new();
    ValidateEpoch {
        net: net.as_mut(),
        criterion: &criterion,
        collective: &mut collective,
        writer: Some(&mut writer),
        epoch: 0,
        niters: val_niters,
        print_freq: spec.training.print_freq,
    }
    .run(val_loader)
}
