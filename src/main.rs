//! Podar CLI
//!
//! Training entry point for the podar library.
//!
//! # Usage
//!
//! ```bash
//! # Train from config
//! podar train config.yaml
//!
//! # Train with overrides
//! podar train config.yaml --epochs 10 --world-size 4
//!
//! # Evaluate a checkpoint
//! podar evaluate config.yaml --checkpoint checkpoints/model_best.json
//!
//! # Compute masks without training
//! podar prune config.yaml
//!
//! # Show config info
//! podar info config.yaml
//! ```

use clap::Parser;
use podar::cli::{run_command, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
