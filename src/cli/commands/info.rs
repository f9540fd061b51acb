//! Info command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::{load_spec, InfoArgs, OutputFormat};
use crate::models::{build_model, param_count};

pub fn run_info(args: InfoArgs, level: LogLevel) -> Result<(), String> {
    let spec = load_spec(&args.config).map_err(|e| format!("Config error: {e}"))?;

    match args.format {
        OutputFormat::Text => {
            log(level, LogLevel::Normal, "Configuration Info:");
            println!();
            println!("Model: {} ({} classes)", spec.model.arch, spec.model.num_classes);
            if let Ok(mut net) =
                build_model(&spec.model.arch, spec.model.num_classes, spec.model.seed)
            {
                let (trainable, total) = param_count(net.as_mut());
                println!("Parameters: {trainable} trainable / {total} total");
            }
            println!(
                "Sparsity: {}:{} ({:?} scope, {:.0}% per tile)",
                spec.sparsity.n(),
                spec.sparsity.m(),
                spec.sparsity.scope(),
                spec.sparsity.theoretical_sparsity() * 100.0
            );
            println!(
                "Optimizer: sgd (lr={}, momentum={}, weight_decay={})",
                spec.optimizer.base_lr, spec.optimizer.momentum, spec.optimizer.weight_decay
            );
            println!("Epochs: {}", spec.training.epochs);
            println!("Batch size: {}", spec.data.batch_size);
            println!("World size: {}", spec.distributed.world_size);
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&spec)
                .map_err(|e| format!("JSON serialization error: {e}"))?;
            println!("{json}");
        }
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(&spec)
                .map_err(|e| format!("YAML serialization error: {e}"))?;
            println!("{yaml}");
        }
    }

    Ok(())
}
