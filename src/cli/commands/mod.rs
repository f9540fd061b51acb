//! CLI command implementations

mod evaluate;
mod info;
mod prune;
mod train;

use crate::cli::LogLevel;
use crate::config::{Cli, Command};

/// Execute a CLI command based on the parsed arguments
pub fn run_command(cli: Cli) -> Result<(), String> {
    let log_level = if cli.quiet {
        LogLevel::Quiet
    } else if cli.verbose {
        LogLevel::Verbose
    } else {
        LogLevel::Normal
    };

    match cli.command {
        Command::Train(args) => train::run_train(args, log_level),
        Command::Evaluate(args) => evaluate::run_evaluate(args, log_level),
        Command::Prune(args) => prune::run_prune(args, log_level),
        Command::Info(args) => info::run_info(args, log_level),
    }
}
