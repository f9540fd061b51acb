//! Append-only scalar metric log
//!
//! Tagged scalars (`Train/Avg_Loss`, `Eval/Avg_Top1`, ...) are appended as
//! JSON lines to `scalars.jsonl` in the run directory. Appending keeps
//! resumed runs in one file, and one JSON object per line keeps the log
//! greppable and streamable.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::checkpoint::Result;

pub const SCALARS_FILE: &str = "scalars.jsonl";

/// One logged scalar sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub step: usize,
    pub tag: String,
    pub value: f32,
    pub wall_time: DateTime<Utc>,
}

/// Writer over the run's scalar log
pub struct ScalarWriter {
    out: BufWriter<File>,
}

impl ScalarWriter {
    /// Open (appending) the scalar log under `dir`.
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file = OpenOptions::new().create(true).append(true).open(dir.join(SCALARS_FILE))?;
        Ok(Self { out: BufWriter::new(file) })
    }

    pub fn add_scalar(&mut self, tag: &str, value: f32, step: usize) -> Result<()> {
        let event =
            ScalarEvent { step, tag: tag.to_string(), value, wall_time: Utc::now() };
        serde_json::to_writer(&mut self.out, &event)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Parse every event in a scalar log, mostly for tests and tooling.
pub fn read_scalars(dir: &Path) -> Result<Vec<ScalarEvent>> {
    let text = std::fs::read_to_string(dir.join(SCALARS_FILE))?;
    let mut events = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        events.push(serde_json::from_str(line)?);
    }
    Ok(events)
}
