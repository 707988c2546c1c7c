//! Store file corruption utilities
//!
//! Each helper edits the file in place and reports what it did, so a test
//! can reopen the store and check which commit survived.

use crate::format::HEADER_SIZE;
use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Cut `path` down to `length` bytes.
pub fn truncate_file(path: impl AsRef<Path>, length: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(length)?;
    file.sync_all()
}

/// XOR the byte at `offset` with `mask` (which must be non-zero).
pub fn flip_byte(path: impl AsRef<Path>, offset: u64, mask: u8) -> io::Result<()> {
    debug_assert_ne!(mask, 0);
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut byte)?;
    byte[0] ^= mask;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&byte)?;
    file.sync_all()
}

/// Store file corruption test utilities
pub struct StoreCorruptionTester {
    /// Store file
    path: PathBuf,
}

impl StoreCorruptionTester {
    /// Create a new corruption tester for a store file
    pub fn new(path: impl AsRef<Path>) -> Self {
        StoreCorruptionTester {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the store file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file size
    pub fn size(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Truncate the file to `new_size` bytes
    pub fn truncate_to(&self, new_size: u64) -> io::Result<TruncationResult> {
        let original_size = self.size()?;
        let new_size = new_size.min(original_size);
        truncate_file(&self.path, new_size)?;
        Ok(TruncationResult {
            original_size,
            new_size,
            bytes_removed: original_size - new_size,
        })
    }

    /// Remove `bytes_to_remove` bytes from the end of the file
    ///
    /// Simulates a crash during write where only part of a commit landed.
    pub fn truncate_tail(&self, bytes_to_remove: u64) -> io::Result<TruncationResult> {
        let original_size = self.size()?;
        self.truncate_to(original_size.saturating_sub(bytes_to_remove))
    }

    /// Append garbage bytes to the file
    ///
    /// Simulates a torn write after the last commit.
    pub fn append_garbage(&self, garbage: &[u8]) -> io::Result<GarbageResult> {
        let original_size = self.size()?;
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(garbage)?;
        file.sync_all()?;
        Ok(GarbageResult {
            original_size,
            new_size: original_size + garbage.len() as u64,
            bytes_appended: garbage.len(),
        })
    }

    /// Flip `count` pseudo-random bytes past the header, derived from `seed`
    ///
    /// Simulates bit rot. The header is left alone so the file still parses
    /// as a store.
    pub fn corrupt_bytes(&self, count: usize, seed: u64) -> io::Result<CorruptionResult> {
        let mut data = std::fs::read(&self.path)?;
        if data.len() <= HEADER_SIZE {
            return Ok(CorruptionResult { offsets: vec![] });
        }
        let body = (data.len() - HEADER_SIZE) as u64;
        let mut offsets = Vec::with_capacity(count);
        for i in 0..count as u64 {
            let pos_seed = seed.wrapping_mul(i + 1).wrapping_add(0x9E37_79B9_7F4A_7C15);
            let pos = HEADER_SIZE + (pos_seed % body) as usize;
            data[pos] ^= ((pos_seed >> 8) as u8).max(1);
            offsets.push(pos as u64);
        }
        std::fs::write(&self.path, data)?;
        Ok(CorruptionResult { offsets })
    }
}

/// Result of truncation
#[derive(Debug)]
pub struct TruncationResult {
    /// Original file size
    pub original_size: u64,
    /// New file size after truncation
    pub new_size: u64,
    /// Bytes removed
    pub bytes_removed: u64,
}

/// Result of appending garbage
#[derive(Debug)]
pub struct GarbageResult {
    /// Original file size
    pub original_size: u64,
    /// New file size after append
    pub new_size: u64,
    /// Bytes appended
    pub bytes_appended: usize,
}

/// Result of byte corruption
#[derive(Debug)]
pub struct CorruptionResult {
    /// Offsets that were modified
    pub offsets: Vec<u64>,
}
