//! Checkpoint recovery
//!
//! Opening a store means finding its newest complete commit. Commits are
//! never overwritten, so the newest complete one is the valid footer
//! closest to the end of the file.
//!
//! ## Scan Strategy
//!
//! 1. Read the header to learn the store's separator
//! 2. Walk candidate end offsets backward from EOF, one byte at a time,
//!    loading the file in windows of `scan_window` bytes
//! 3. A candidate whose last 28 bytes carry the separator is a footer
//! 4. A checksum-sealed footer must also have a sane prior length and a
//!    CRC32 over `[prior, end - 4)` that matches
//! 5. The first footer to pass defines the committed version; the root
//!    Folder record sits immediately before it
//!
//! Anything after the checkpoint is an unfinished transaction. The store
//! is reported dirty and the bytes are discarded by the next writer.

use crate::file::RecordFile;
use crate::format::{
    CommitFooter, FileHeader, FolderRecord, Seal, Separator, FOLDER_SIZE, FOOTER_SIZE,
    MIN_STORE_SIZE, SEPARATOR_SIZE,
};
use k2v_core::reference::FOLDER_TYPE;
use k2v_core::{Error, Reference, Result};
use tracing::{debug, warn};

/// Chunk size used when re-reading a commit body to verify its checksum.
const CHECKSUM_CHUNK_SIZE: usize = 64 * 1024;

/// The newest complete commit found in a store file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// File header
    pub header: FileHeader,

    /// File length at the end of the commit footer
    pub file_length: u64,

    /// Root Folder of the committed version
    pub root: FolderRecord<Reference>,

    /// File length found on disk
    pub capacity: u64,
}

impl Checkpoint {
    /// Reference to the committed root Folder.
    pub fn root_reference(&self) -> Reference {
        Reference::new(FOLDER_TYPE, self.file_length - FOOTER_SIZE as u64)
    }

    /// True if bytes follow the checkpoint.
    pub fn is_dirty(&self) -> bool {
        self.file_length != self.capacity
    }

    /// Bytes after the checkpoint.
    pub fn trailing_bytes(&self) -> u64 {
        self.capacity - self.file_length
    }
}

/// One entry in a store's commit chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitRecord {
    /// File length at the end of this commit's footer
    pub file_length: u64,

    /// File length before this commit started writing
    pub prior_file_length: u64,

    /// Version number of the root Folder
    pub version: u64,

    /// How the commit was sealed
    pub seal: Seal,
}

/// Find the newest complete commit in `file`.
///
/// Fails with [`Error::Format`] if the file is shorter than a minimal store,
/// has a bad header, or holds no valid footer.
pub fn recover(file: &RecordFile, scan_window: usize) -> Result<Checkpoint> {
    let capacity = file.len()?;
    if capacity < MIN_STORE_SIZE {
        return Err(Error::format(format!(
            "file is {capacity} bytes, a store needs at least {MIN_STORE_SIZE}"
        )));
    }
    let header = file.read_header()?;
    let window = scan_window.max(FOOTER_SIZE) as u64;

    let mut buf: Vec<u8> = Vec::new();
    let mut buf_start = capacity;
    let mut length = capacity;
    while length >= MIN_STORE_SIZE {
        let footer_start = length - FOOTER_SIZE as u64;
        if footer_start < buf_start {
            buf_start = length.saturating_sub(window);
            buf.resize((length - buf_start) as usize, 0);
            file.read_at(&mut buf, buf_start)?;
        }
        let at = (footer_start - buf_start) as usize;
        let candidate = &buf[at..at + FOOTER_SIZE];
        if candidate[8..8 + SEPARATOR_SIZE] == header.separator {
            let mut raw = [0u8; FOOTER_SIZE];
            raw.copy_from_slice(candidate);
            let footer = CommitFooter::from_bytes(&raw);
            if verify(file, &footer, length)? {
                let root = file.read_folder(Reference::new(FOLDER_TYPE, footer_start))?;
                debug!(
                    target: "k2v::recovery",
                    path = %file.path().display(),
                    file_length = length,
                    capacity,
                    version = root.version,
                    "Found checkpoint"
                );
                return Ok(Checkpoint {
                    header,
                    file_length: length,
                    root,
                    capacity,
                });
            }
            warn!(
                target: "k2v::recovery",
                offset = footer_start,
                "Skipping footer that fails verification"
            );
        }
        length -= 1;
    }
    Err(Error::format("no valid checkpoint"))
}

/// Check a footer's seal. Double-sync footers are trusted as written.
fn verify(file: &RecordFile, footer: &CommitFooter, length: u64) -> Result<bool> {
    let Seal::Checksum(expected) = footer.seal else {
        return Ok(true);
    };
    let end = length - 4;
    let prior = footer.prior_file_length;
    if prior > end {
        return Ok(false);
    }
    Ok(checksum_range(file, prior, end)? == expected)
}

/// CRC32 of the bytes in `[start, end)`.
pub fn checksum_range(file: &RecordFile, start: u64, end: u64) -> Result<u32> {
    let mut hasher = crc32fast::Hasher::new();
    let mut chunk = vec![0u8; CHECKSUM_CHUNK_SIZE.min((end - start) as usize)];
    let mut at = start;
    while at < end {
        let n = CHECKSUM_CHUNK_SIZE.min((end - at) as usize);
        file.read_at(&mut chunk[..n], at)?;
        hasher.update(&chunk[..n]);
        at += n as u64;
    }
    Ok(hasher.finalize())
}

/// Walk the chain of commits ending at `file_length`, newest first.
///
/// The walk follows each footer's prior length and stops at the first
/// footer that does not verify, at a compaction boundary (prior length 0),
/// or at the first commit of the file.
pub fn commit_history(
    file: &RecordFile,
    separator: &Separator,
    file_length: u64,
) -> Result<Vec<CommitRecord>> {
    let mut history = Vec::new();
    let mut length = file_length;
    loop {
        let raw = file.read_record(length, FOOTER_SIZE)?;
        let mut bytes = [0u8; FOOTER_SIZE];
        bytes.copy_from_slice(&raw);
        let footer = CommitFooter::from_bytes(&bytes);
        if footer.separator != *separator || !verify(file, &footer, length)? {
            break;
        }
        let root = file.read_folder(Reference::new(
            FOLDER_TYPE,
            length - FOOTER_SIZE as u64,
        ))?;
        history.push(CommitRecord {
            file_length: length,
            prior_file_length: footer.prior_file_length,
            version: root.version,
            seal: footer.seal,
        });
        if footer.prior_file_length < MIN_STORE_SIZE
            || footer.prior_file_length > length - (FOLDER_SIZE + FOOTER_SIZE) as u64
        {
            break;
        }
        length = footer.prior_file_length;
    }
    Ok(history)
}
