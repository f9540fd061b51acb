//! Mask persistence
//!
//! Masks are written once by rank 0 and loaded by every rank (and by later
//! resumed runs), so all workers train under the identical sparsity pattern.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use super::Result;

/// One stored mask: shape plus 0/1 bytes in row-major order
#[derive(Debug, Serialize, Deserialize)]
struct MaskEntry {
    shape: Vec<usize>,
    bits: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MaskFile {
    /// Pattern the masks were computed with, recorded for inspection
    n: usize,
    m: usize,
    masks: BTreeMap<String, MaskEntry>,
}

/// Write all masks to `path` as JSON.
pub fn save_masks(
    path: impl AsRef<Path>,
    masks: &BTreeMap<String, ArrayD<f32>>,
    n: usize,
    m: usize,
) -> Result<()> {
    let mut entries = BTreeMap::new();
    for (name, mask) in masks {
        let bits: Vec<u8> = mask.iter().map(|&v| (v != 0.0) as u8).collect();
        entries.insert(name.clone(), MaskEntry { shape: mask.shape().to_vec(), bits });
    }
    let file = MaskFile { n, m, masks: entries };
    if let Some(dir) = path.as_ref().parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    fs::write(path, serde_json::to_vec(&file)?)?;
    Ok(())
}

/// Load masks previously written by [`save_masks`].
pub fn load_masks(path: impl AsRef<Path>) -> Result<BTreeMap<String, ArrayD<f32>>> {
    let raw = fs::read(path)?;
    let file: MaskFile = serde_json::from_slice(&raw)?;
    let mut masks = BTreeMap::new();
    for (name, entry) in file.masks {
        let data: Vec<f32> = entry.bits.iter().map(|&b| b as f32).collect();
        let mask = ArrayD::from_shape_vec(ndarray::IxDyn(&entry.shape), data)
            .map_err(|_| super::PruneError::NotMaskable(name.clone()))?;
        masks.insert(name, mask);
    }
    Ok(masks)
}
