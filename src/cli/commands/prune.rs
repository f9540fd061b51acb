//! Prune command implementation
//!
//! Computes transposable masks for a freshly initialized model and writes
//! them where a later training run will pick them up. Useful for inspecting
//! the pattern a config produces without starting a run.

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::{load_spec, validate, PruneArgs};
use crate::engine::MASK_FILE;
use crate::models::build_model;
use crate::prune::{compute_model_masks, save_masks};

pub fn run_prune(args: PruneArgs, level: LogLevel) -> Result<(), String> {
    let spec = load_spec(&args.config).map_err(|e| format!("Config error: {e}"))?;
    validate(&spec).map_err(|e| format!("Config error: {e}"))?;

    log(
        level,
        LogLevel::Normal,
        &format!(
            "Computing {}:{} masks for {}",
            spec.sparsity.n(),
            spec.sparsity.m(),
            spec.model.arch
        ),
    );

    let mut net = build_model(&spec.model.arch, spec.model.num_classes, spec.model.seed)
        .map_err(|e| format!("Model error: {e}"))?;
    let masks =
        compute_model_masks(net.as_mut(), &spec.sparsity).map_err(|e| format!("Prune error: {e}"))?;

    for (name, mask) in &masks {
        let total = mask.len();
        let kept = mask.iter().filter(|&&v| v != 0.0).count();
        log(
            level,
            LogLevel::Verbose,
            &format!("  {name}: {:.1}% pruned", 100.0 * (total - kept) as f32 / total as f32),
        );
    }

    let output = args
        .output
        .or_else(|| spec.sparsity.mask_file().cloned())
        .unwrap_or_else(|| spec.training.model_dir.join(MASK_FILE));
    save_masks(&output, &masks, spec.sparsity.n(), spec.sparsity.m())
        .map_err(|e| format!("Prune error: {e}"))?;

    log(
        level,
        LogLevel::Normal,
        &format!("Saved {} masks to {}", masks.len(), output.display()),
    );
    Ok(())
}
