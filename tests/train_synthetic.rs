//! End-to-end training integration tests
//!
//! Drives the full pipeline from YAML config to run artifacts on datasets
//! small enough to train in-process: masks are computed and saved, epochs
//! train and validate, checkpoints land on disk, and a saved checkpoint
//! evaluates again.

use std::io::Write;

use tempfile::{NamedTempFile, TempDir};

use podar::config::{load_spec, validate};
use podar::data::{BinWriter, RgbImage};
use podar::engine::{
    load_latest, read_scalars, run_evaluate, run_training, BEST_FILE, CHECKPOINT_FILE, MASK_FILE,
};

/// Write a synthetic-dataset run config pointing at `model_dir`.
fn synthetic_config(model_dir: &std::path::Path, epochs: usize) -> NamedTempFile {
    let yaml = format!(
        r#"
model:
  arch: convnet_nm
  num_classes: 4
  seed: 3
data:
  dataset: synthetic
  batch_size: 8
  crop: 12
  resize: 12
  synthetic_train_len: 32
  synthetic_val_len: 16
optimizer:
  base_lr: 0.02
training:
  epochs: {epochs}
  print_freq: 2
  model_dir: "{}"
"#,
        model_dir.display()
    );
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn test_e2e_synthetic_training_writes_artifacts() {
    let run_dir = TempDir::new().unwrap();
    let config = synthetic_config(run_dir.path(), 2);

    let spec = load_spec(config.path()).unwrap();
    validate(&spec).unwrap();
    run_training(&spec, 0).unwrap();

    assert!(run_dir.path().join(CHECKPOINT_FILE).exists(), "resume checkpoint should exist");
    assert!(run_dir.path().join(BEST_FILE).exists(), "best checkpoint should exist");
    assert!(run_dir.path().join(MASK_FILE).exists(), "mask file should exist");

    let ckpt = load_latest(run_dir.path()).unwrap().unwrap();
    assert_eq!(ckpt.epoch, 2);
    assert_eq!(ckpt.arch, "convnet_nm");
    assert!((0.0..=100.0).contains(&ckpt.best_prec1));

    let events = read_scalars(run_dir.path()).unwrap();
    for tag in ["learning_rate", "Train/Avg_Loss", "Train/Avg_Top1", "Eval/Avg_Loss", "Eval/Avg_Top1"]
    {
        assert!(events.iter().any(|e| e.tag == tag), "missing scalar tag {tag}");
    }

    let losses: Vec<f32> =
        events.iter().filter(|e| e.tag == "Train/Avg_Loss").map(|e| e.value).collect();
    assert!(losses.iter().all(|l| l.is_finite() && *l > 0.0));
    let (first, last) = (losses[0], losses[losses.len() - 1]);
    assert!(last <= first + 0.5, "loss diverged: first {first}, last {last}");
}

#[test]
fn test_e2e_resume_then_evaluate() {
    let run_dir = TempDir::new().unwrap();

    let config = synthetic_config(run_dir.path(), 1);
    let spec = load_spec(config.path()).unwrap();
    run_training(&spec, 0).unwrap();
    assert_eq!(load_latest(run_dir.path()).unwrap().unwrap().epoch, 1);

    // Same directory, longer run: picks up after epoch 1 instead of restarting
    let config = synthetic_config(run_dir.path(), 2);
    let spec = load_spec(config.path()).unwrap();
    run_training(&spec, 0).unwrap();
    assert_eq!(load_latest(run_dir.path()).unwrap().unwrap().epoch, 2);

    let mut spec = spec;
    spec.training.checkpoint_path = Some(run_dir.path().join(BEST_FILE));
    let prec1 = run_evaluate(&spec).unwrap();
    assert!((0.0..=100.0).contains(&prec1), "Prec@1 out of range: {prec1}");
}

/// Pack a tiny two-class dataset: class 0 is dark, class 1 is bright.
fn write_bin_split(path: &std::path::Path, count: usize) {
    let mut writer = BinWriter::create(path, 2).unwrap();
    for i in 0..count {
        let label = i % 2;
        let level = if label == 0 { 40 } else { 210 };
        let jitter = (i / 2 * 7 % 30) as u8;
        let img = RgbImage::filled(16, 16, [level + jitter, level, level + jitter / 2]);
        writer.push(label, &img).unwrap();
    }
    writer.finish().unwrap();
}

#[test]
fn test_e2e_packed_dataset_training() {
    let data_dir = TempDir::new().unwrap();
    let run_dir = TempDir::new().unwrap();
    let train_path = data_dir.path().join("train.bin");
    let val_path = data_dir.path().join("val.bin");
    write_bin_split(&train_path, 24);
    write_bin_split(&val_path, 8);

    let yaml = format!(
        r#"
model:
  arch: convnet_nm
  num_classes: 2
  seed: 5
data:
  train: "{}"
  val: "{}"
  batch_size: 8
  crop: 16
  resize: 16
optimizer:
  base_lr: 0.01
training:
  epochs: 1
  print_freq: 1
  model_dir: "{}"
"#,
        train_path.display(),
        val_path.display(),
        run_dir.path().display()
    );
    let mut config = NamedTempFile::new().unwrap();
    config.write_all(yaml.as_bytes()).unwrap();

    let spec = load_spec(config.path()).unwrap();
    validate(&spec).unwrap();
    run_training(&spec, 0).unwrap();

    assert!(run_dir.path().join(CHECKPOINT_FILE).exists());
    let events = read_scalars(run_dir.path()).unwrap();
    assert!(events.iter().any(|e| e.tag == "Eval/Avg_Top1"));
}
