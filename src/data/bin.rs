//! Packed binary image dataset
//!
//! A single file holds a small header followed by length-prefixed RGB
//! records, so a training job needs exactly one open file per split and no
//! image decoder. The whole file is loaded into memory up front and records
//! are decoded on demand from the shared buffer.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic     [u8; 8]  = b"PODARBIN"
//! version   u32      = 1
//! count     u32
//! classes   u32
//! records   count x { label: u32, height: u32, width: u32, rgb: [u8; h*w*3] }
//! ```

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::image::RgbImage;
use super::{DataError, DataSource, Result};

const MAGIC: [u8; 8] = *b"PODARBIN";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 20;
const COUNT_OFFSET: u64 = 12;

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    buf.get(at..at + 4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// A fully in-memory packed dataset
pub struct BinDataset {
    buf: Vec<u8>,
    offsets: Vec<usize>,
    num_classes: usize,
}

impl BinDataset {
    /// Load and index a packed dataset file.
    pub fn open(path: &Path) -> Result<Self> {
        let mut buf = Vec::new();
        File::open(path)?.read_to_end(&mut buf)?;
        if buf.len() < HEADER_LEN {
            return Err(DataError::Truncated(buf.len() as u64));
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[..8]);
        if magic != MAGIC {
            return Err(DataError::BadMagic(magic));
        }
        let version = read_u32(&buf, 8).unwrap_or(0);
        if version != VERSION {
            return Err(DataError::BadVersion(version));
        }
        let count = read_u32(&buf, 12).unwrap_or(0) as usize;
        let num_classes = read_u32(&buf, 16).unwrap_or(0) as usize;

        let mut offsets = Vec::with_capacity(count);
        let mut at = HEADER_LEN;
        for _ in 0..count {
            let h = read_u32(&buf, at + 4).ok_or(DataError::Truncated(at as u64))? as usize;
            let w = read_u32(&buf, at + 8).ok_or(DataError::Truncated(at as u64))? as usize;
            let pixels = h
                .checked_mul(w)
                .and_then(|p| p.checked_mul(3))
                .ok_or(DataError::Truncated(at as u64))?;
            let end = at + 12 + pixels;
            if end > buf.len() {
                return Err(DataError::Truncated(at as u64));
            }
            offsets.push(at);
            at = end;
        }
        Ok(Self { buf, offsets, num_classes })
    }
}

impl DataSource for BinDataset {
    fn len(&self) -> usize {
        self.offsets.len()
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn get(&self, idx: usize) -> Result<(RgbImage, usize)> {
        let at = *self
            .offsets
            .get(idx)
            .ok_or(DataError::OutOfRange { idx, len: self.offsets.len() })?;
        let label = read_u32(&self.buf, at).ok_or(DataError::Truncated(at as u64))? as usize;
        let h = read_u32(&self.buf, at + 4).ok_or(DataError::Truncated(at as u64))? as usize;
        let w = read_u32(&self.buf, at + 8).ok_or(DataError::Truncated(at as u64))? as usize;
        let pixels = self.buf[at + 12..at + 12 + h * w * 3].to_vec();
        Ok((RgbImage::new(h, w, pixels), label))
    }
}

/// Streaming writer for the packed format.
///
/// Records are appended as they arrive; `finish` patches the header count.
pub struct BinWriter {
    out: BufWriter<File>,
    count: u32,
}

impl BinWriter {
    pub fn create(path: &Path, num_classes: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(&MAGIC)?;
        out.write_all(&VERSION.to_le_bytes())?;
        out.write_all(&0u32.to_le_bytes())?;
        out.write_all(&(num_classes as u32).to_le_bytes())?;
        Ok(Self { out, count: 0 })
    }

    pub fn push(&mut self, label: usize, img: &RgbImage) -> Result<()> {
        self.out.write_all(&(label as u32).to_le_bytes())?;
        self.out.write_all(&(img.height() as u32).to_le_bytes())?;
        self.out.write_all(&(img.width() as u32).to_le_bytes())?;
        self.out.write_all(img.data())?;
        self.count += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        let file = self.out.get_mut();
        file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        file.write_all(&self.count.to_le_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}
