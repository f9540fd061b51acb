//! CLI argument parsing
//!
//! # Usage
//!
//! ```bash
//! podar train config.yaml
//! podar train config.yaml --epochs 10 --world-size 4
//! podar evaluate config.yaml --checkpoint checkpoints/model_best.json
//! podar prune config.yaml --output masks/resnet18.json
//! podar info config.yaml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Podar: distributed training with transposable N:M sparsity
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "podar")]
#[command(version)]
#[command(about = "Distributed image classifier training under transposable N:M sparsity masks")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Train a model from YAML configuration
    Train(TrainArgs),

    /// Evaluate a checkpoint on the validation split
    Evaluate(EvaluateArgs),

    /// Compute and save sparsity masks without training
    Prune(PruneArgs),

    /// Display information about a configuration
    Info(InfoArgs),
}

/// Arguments for the train command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct TrainArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Rank of this process; workers are spawned with it set, leave unset
    /// to launch a full run
    #[arg(long)]
    pub rank: Option<usize>,

    /// Override number of epochs
    #[arg(short, long)]
    pub epochs: Option<usize>,

    /// Override global batch size
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Override base learning rate
    #[arg(short, long)]
    pub lr: Option<f32>,

    /// Override number of worker processes
    #[arg(short, long)]
    pub world_size: Option<usize>,

    /// Override checkpoint directory
    #[arg(short, long)]
    pub model_dir: Option<PathBuf>,

    /// Override random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Dry run (validate config but don't train)
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the evaluate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct EvaluateArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Checkpoint to evaluate; overrides `training.checkpoint_path`
    #[arg(short, long)]
    pub checkpoint: Option<PathBuf>,
}

/// Arguments for the prune command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct PruneArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Where to write the masks; overrides `sparsity.mask_file`
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the info command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct InfoArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Output format (text, json, yaml)
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format for the info command
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            _ => Err(format!("Unknown output format: {s}. Valid formats: text, json, yaml")),
        }
    }
}

/// Parse CLI arguments from a string slice (for testing)
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

/// Apply command-line overrides to a TrainSpec
pub fn apply_overrides(spec: &mut super::TrainSpec, args: &TrainArgs) {
    if let Some(epochs) = args.epochs {
        spec.training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        spec.data.batch_size = batch_size;
    }
    if let Some(lr) = args.lr {
        spec.optimizer.base_lr = lr;
    }
    if let Some(world_size) = args.world_size {
        spec.distributed.world_size = world_size;
    }
    if let Some(model_dir) = &args.model_dir {
        spec.training.model_dir = model_dir.clone();
    }
    if let Some(seed) = args.seed {
        spec.model.seed = seed;
    }
}

/// Rebuild the argument vector workers must receive so their effective
/// configuration matches the launcher's; the pool appends `--rank`.
pub fn forward_args(args: &TrainArgs) -> Vec<String> {
    let mut argv = vec!["train".to_string(), args.config.display().to_string()];
    if let Some(epochs) = args.epochs {
        argv.push("--epochs".to_string());
        argv.push(epochs.to_string());
    }
    if let Some(batch_size) = args.batch_size {
        argv.push("--batch-size".to_string());
        argv.push(batch_size.to_string());
    }
    if let Some(lr) = args.lr {
        argv.push("--lr".to_string());
        argv.push(lr.to_string());
    }
    if let Some(world_size) = args.world_size {
        argv.push("--world-size".to_string());
        argv.push(world_size.to_string());
    }
    if let Some(model_dir) = &args.model_dir {
        argv.push("--model-dir".to_string());
        argv.push(model_dir.display().to_string());
    }
    if let Some(seed) = args.seed {
        argv.push("--seed".to_string());
        argv.push(seed.to_string());
    }
    argv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_train_command() {
        // TEST_ID: CLI-001
        let cli = parse_args(["podar", "train", "config.yaml"]).unwrap();
        match cli.command {
            Command::Train(args) => {
                assert_eq!(args.config, PathBuf::from("config.yaml"));
                assert_eq!(args.rank, None);
                assert!(!args.dry_run);
            }
            _ => panic!("Expected Train command"),
        }
    }

    #[test]
    fn test_parse_train_with_overrides() {
        let cli = parse_args([
            "podar",
            "train",
            "config.yaml",
            "--epochs",
            "10",
            "--batch-size",
            "32",
            "--lr",
            "0.001",
            "--world-size",
            "4",
        ])
        .unwrap();

        match cli.command {
            Command::Train(args) => {
                assert_eq!(args.epochs, Some(10));
                assert_eq!(args.batch_size, Some(32));
                assert!((args.lr.unwrap() - 0.001).abs() < 1e-6);
                assert_eq!(args.world_size, Some(4));
            }
            _ => panic!("Expected Train command"),
        }
    }

    #[test]
    fn test_parse_worker_rank() {
        let cli = parse_args(["podar", "train", "config.yaml", "--rank", "2"]).unwrap();
        match cli.command {
            Command::Train(args) => assert_eq!(args.rank, Some(2)),
            _ => panic!("Expected Train command"),
        }
    }

    #[test]
    fn test_overrides_reach_spec() {
        // TEST_ID: CLI-002
        let mut spec: super::super::TrainSpec =
            serde_yaml::from_str("model:\n  arch: convnet_nm\n").unwrap();
        let cli = parse_args([
            "podar",
            "train",
            "c.yaml",
            "--epochs",
            "3",
            "--world-size",
            "2",
            "--seed",
            "9",
        ])
        .unwrap();
        let Command::Train(args) = cli.command else { panic!("Expected Train command") };
        apply_overrides(&mut spec, &args);
        assert_eq!(spec.training.epochs, 3, "CLI-002 FALSIFIED: --epochs must override the file");
        assert_eq!(spec.distributed.world_size, 2);
        assert_eq!(spec.model.seed, 9);
    }

    #[test]
    fn test_forward_args_round_trip() {
        // TEST_ID: CLI-003
        let cli =
            parse_args(["podar", "train", "c.yaml", "--epochs", "5", "--world-size", "2"]).unwrap();
        let Command::Train(args) = cli.command else { panic!("Expected Train command") };

        let mut argv = vec!["podar".to_string()];
        argv.extend(forward_args(&args));
        argv.push("--rank".to_string());
        argv.push("1".to_string());

        let worker = parse_args(argv).unwrap();
        let Command::Train(wargs) = worker.command else { panic!("Expected Train command") };
        assert_eq!(wargs.rank, Some(1), "CLI-003 FALSIFIED: workers must parse the forwarded args");
        assert_eq!(wargs.epochs, Some(5));
        assert_eq!(wargs.world_size, Some(2));
    }

    #[test]
    fn test_parse_evaluate_command() {
        let cli = parse_args([
            "podar",
            "evaluate",
            "config.yaml",
            "--checkpoint",
            "ckpt.json",
        ])
        .unwrap();
        match cli.command {
            Command::Evaluate(args) => {
                assert_eq!(args.checkpoint, Some(PathBuf::from("ckpt.json")));
            }
            _ => panic!("Expected Evaluate command"),
        }
    }

    #[test]
    fn test_parse_info_format() {
        let cli = parse_args(["podar", "info", "config.yaml", "--format", "json"]).unwrap();
        match cli.command {
            Command::Info(args) => assert_eq!(args.format, OutputFormat::Json),
            _ => panic!("Expected Info command"),
        }
    }
}
