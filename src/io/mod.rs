//! Bounded file input and durable file output.
//!
//! Input files are memory-mapped through `SafeReader` and copied into an owned
//! buffer, which becomes the image a parsed binary mutates. Output goes through
//! `write_image`, which flushes and syncs before the handle is dropped.

pub mod error;

use crate::io::error::{IoError, Result};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Resource limits applied when opening an input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IOLimits {
    /// The absolute maximum file size that can be opened.
    pub max_file_size: u64,
}

impl Default for IOLimits {
    fn default() -> Self {
        Self {
            max_file_size: 512 * 1024 * 1024, // 512MB
        }
    }
}

/// A bounded, memory-mapped view of an input file.
pub struct SafeReader {
    path: PathBuf,
    // None when the file size is zero; memmap cannot map empty files.
    mmap: Option<Mmap>,
    file_size: u64,
}

impl SafeReader {
    /// Opens and maps a file, failing when it exceeds `limits.max_file_size`.
    pub fn open<P: AsRef<Path>>(path: P, limits: &IOLimits) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        crate::log_debug!(
            path = %path.display(),
            size = file_size,
            limit = limits.max_file_size,
            "Opening input file"
        );

        if file_size > limits.max_file_size {
            crate::log_warn!(
                path = %path.display(),
                size = file_size,
                limit = limits.max_file_size,
                "File is too large"
            );
            return Err(IoError::FileTooLarge {
                limit: limits.max_file_size,
                found: file_size,
            });
        }

        let mmap = if file_size == 0 {
            None
        } else {
            // Safety: read-only mapping of a regular file we just opened.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            file_size,
        })
    }

    /// Returns the total size of the underlying file in bytes.
    pub fn size(&self) -> u64 {
        self.file_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The whole mapped file. Empty for zero-length files.
    pub fn as_slice(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    /// Reads up to `len` bytes at `offset`, clamped at end of file.
    pub fn read_at(&self, offset: u64, len: u64) -> &[u8] {
        let data = self.as_slice();
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len as usize).min(data.len());
        &data[start..end]
    }

    /// Copies the mapped file into an owned buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

/// Reads a whole file into memory under the given limits.
pub fn read_image<P: AsRef<Path>>(path: P, limits: &IOLimits) -> Result<Vec<u8>> {
    let reader = SafeReader::open(path, limits)?;
    Ok(reader.to_vec())
}

/// Writes `data` to `path`, replacing any existing file.
///
/// The file is flushed and synced before returning. On failure the handle is
/// still released and the partially written file must be discarded.
pub fn write_image<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(data)?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| IoError::StdIo(e.into_error()))?;
    file.sync_all()?;

    crate::log_debug!(path = %path.display(), size = data.len(), "Wrote output image");
    Ok(())
}
