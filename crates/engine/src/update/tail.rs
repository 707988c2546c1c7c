//! Buffered appends to the end of the store file.

use crc32fast::Hasher;
use k2v_core::Result;
use std::fs::File;
use std::io::Write;
use std::mem;

/// Append side of the store file for one Update.
///
/// Tracks the file offset of the next byte and a running checksum of every
/// byte written through [`write`](Self::write) since the Update began.
pub(crate) struct Tail {
    file: File,
    buffer: Vec<u8>,
    capacity: usize,
    address: u64,
    crc: Hasher,
}

impl Tail {
    /// `address` must be the current length of `file`.
    pub(crate) fn new(file: File, mut buffer: Vec<u8>, capacity: usize, address: u64) -> Self {
        buffer.clear();
        Tail {
            file,
            buffer,
            capacity,
            address,
            crc: Hasher::new(),
        }
    }

    /// File offset of the next byte.
    pub(crate) fn address(&self) -> u64 {
        self.address
    }

    /// Append and checksum.
    pub(crate) fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.crc.update(bytes);
        self.append(bytes)
    }

    /// Append without checksumming. Only valid for commits sealed by
    /// double sync.
    pub(crate) fn write_unchecked(&mut self, bytes: &[u8]) -> Result<()> {
        self.append(bytes)
    }

    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if self.buffer.len() + bytes.len() > self.capacity {
            self.flush()?;
        }
        if bytes.len() > self.capacity {
            self.file.write_all(bytes)?;
        } else {
            if self.buffer.capacity() == 0 {
                self.buffer.reserve(self.capacity);
            }
            self.buffer.extend_from_slice(bytes);
        }
        self.address += bytes.len() as u64;
        Ok(())
    }

    /// Checksum of everything written so far.
    pub(crate) fn checksum(&self) -> u32 {
        self.crc.clone().finalize()
    }

    /// Push buffered bytes to the OS.
    pub(crate) fn flush(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.file.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }

    /// Flush and wait for the data to reach the disk.
    pub(crate) fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Second handle on the file, for syncing after the Update has ended.
    pub(crate) fn try_clone_file(&self) -> Result<File> {
        Ok(self.file.try_clone()?)
    }

    /// Flush and hand over the write buffer.
    pub(crate) fn take_buffer(&mut self) -> Result<Vec<u8>> {
        self.flush()?;
        Ok(mem::take(&mut self.buffer))
    }

    /// Give back the file handle and the (emptied) buffer. Unflushed bytes
    /// are dropped.
    pub(crate) fn into_parts(mut self) -> (File, Vec<u8>) {
        self.buffer.clear();
        (self.file, self.buffer)
    }
}
