//! Evaluate command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::{load_spec, validate, EvaluateArgs};
use crate::engine;

pub fn run_evaluate(args: EvaluateArgs, level: LogLevel) -> Result<(), String> {
    log(
        level,
        LogLevel::Normal,
        &format!("Podar: evaluating from {}", args.config.display()),
    );

    let mut spec = load_spec(&args.config).map_err(|e| format!("Config error: {e}"))?;
    if let Some(checkpoint) = &args.checkpoint {
        spec.training.checkpoint_path = Some(checkpoint.clone());
    }
    validate(&spec).map_err(|e| format!("Config error: {e}"))?;

    let prec1 = engine::run_evaluate(&spec).map_err(|e| format!("Evaluation error: {e}"))?;
    log(level, LogLevel::Normal, &format!("Evaluation complete (Prec@1 {prec1:.3})"));
    Ok(())
}
