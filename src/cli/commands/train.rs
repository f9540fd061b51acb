//! Train command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::{apply_overrides, forward_args, load_spec, validate, TrainArgs};
use crate::dist::WorkerPool;
use crate::engine::run_training;

pub fn run_train(args: TrainArgs, level: LogLevel) -> Result<(), String> {
    if args.rank.is_none() {
        log(
            level,
            LogLevel::Normal,
            &format!("Podar: training from {}", args.config.display()),
        );
    }

    // Load, apply command-line overrides, then validate the effective config
    let mut spec = load_spec(&args.config).map_err(|e| format!("Config error: {e}"))?;
    apply_overrides(&mut spec, &args);
    validate(&spec).map_err(|e| format!("Config error: {e}"))?;

    if args.dry_run {
        log(level, LogLevel::Normal, "Dry run - config validated successfully");
        log(
            level,
            LogLevel::Verbose,
            &format!("  Model: {} ({} classes)", spec.model.arch, spec.model.num_classes),
        );
        log(
            level,
            LogLevel::Verbose,
            &format!("  Sparsity: {}:{}", spec.sparsity.n(), spec.sparsity.m()),
        );
        log(
            level,
            LogLevel::Verbose,
            &format!(
                "  Optimizer: sgd (lr={}, momentum={})",
                spec.optimizer.base_lr, spec.optimizer.momentum
            ),
        );
        log(level, LogLevel::Verbose, &format!("  Epochs: {}", spec.training.epochs));
        log(
            level,
            LogLevel::Verbose,
            &format!(
                "  Batch size: {} across {} ranks",
                spec.data.batch_size, spec.distributed.world_size
            ),
        );
        return Ok(());
    }

    match args.rank {
        // Spawned worker: run our rank and exit, the launcher reports
        Some(rank) => {
            run_training(&spec, rank).map_err(|e| format!("Training error: {e}"))?;
            return Ok(());
        }
        None if spec.distributed.world_size > 1 => {
            let pool = WorkerPool::spawn(spec.distributed.world_size, &forward_args(&args))
                .map_err(|e| format!("Launch error: {e}"))?;
            // A chief failure drops the pool, which kills the workers
            run_training(&spec, 0).map_err(|e| format!("Training error: {e}"))?;
            pool.wait().map_err(|e| format!("Worker error: {e}"))?;
        }
        None => {
            run_training(&spec, 0).map_err(|e| format!("Training error: {e}"))?;
        }
    }

    log(level, LogLevel::Normal, "Training complete!");
    Ok(())
}
