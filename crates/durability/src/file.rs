//! Positional record reads.
//!
//! A store file is read through a single shared handle using positional
//! reads, so any number of readers can load records concurrently without a
//! lock and without disturbing the writer's cursor.
//!
//! Every loader takes the reference that points at a record, checks that
//! its type code is the kind being asked for, and decodes the bytes ending
//! at the reference's data offset into a typed node.

use crate::format::{
    map_size, run_size, FileHeader, FolderRecord, LeafNode, MapNode, RunNode,
    DOCUMENT_LENGTH_SIZE, FOLDER_SIZE, HEADER_SIZE, LEAF_SIZE,
};
use k2v_core::{Error, Kind, Reference, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Where a stored document's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentSpan {
    /// File offset of the first byte
    pub start: u64,
    /// Number of bytes
    pub length: u64,
}

/// Read-only view of a store file.
#[derive(Debug)]
pub struct RecordFile {
    file: File,
    path: PathBuf,
}

impl RecordFile {
    /// Open `path` for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).open(&path)?;
        Ok(RecordFile { file, path })
    }

    /// Path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the file on disk.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// True if the file has no bytes.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Fill `buf` from `offset`. Reading past the end is an I/O error.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        read_exact_at(&self.file, buf, offset)?;
        Ok(())
    }

    /// Load the `size` bytes that end at `end`.
    pub fn read_record(&self, end: u64, size: usize) -> Result<Vec<u8>> {
        let start = end.checked_sub(size as u64).ok_or_else(|| {
            Error::corruption(format!("record of {size} bytes cannot end at offset {end}"))
        })?;
        let mut buf = vec![0u8; size];
        self.read_at(&mut buf, start)?;
        Ok(buf)
    }

    /// Read and check the file header.
    pub fn read_header(&self) -> Result<FileHeader> {
        let mut buf = [0u8; HEADER_SIZE];
        self.read_at(&mut buf, 0).map_err(|e| match e {
            Error::IoError(io) if io.kind() == io::ErrorKind::UnexpectedEof => {
                Error::format("file is shorter than a header")
            }
            other => other,
        })?;
        FileHeader::from_bytes(&buf)
    }

    /// Load the Map `r` points at.
    pub fn read_map(&self, r: Reference) -> Result<MapNode<Reference>> {
        match r.kind() {
            Kind::Map { arity } => {
                MapNode::decode(arity, &self.read_record(r.data(), map_size(arity))?)
            }
            other => Err(expected("map", other)),
        }
    }

    /// Load the Run `r` points at.
    pub fn read_run(&self, r: Reference) -> Result<RunNode<Reference>> {
        match r.kind() {
            Kind::Run { length } => {
                RunNode::decode(length, &self.read_record(r.data(), run_size(length))?)
            }
            other => Err(expected("run", other)),
        }
    }

    /// Load the Leaf `r` points at.
    pub fn read_leaf(&self, r: Reference) -> Result<LeafNode<Reference>> {
        match r.kind() {
            Kind::Leaf => LeafNode::decode(&self.read_record(r.data(), LEAF_SIZE)?),
            other => Err(expected("leaf", other)),
        }
    }

    /// Load the Folder `r` points at.
    pub fn read_folder(&self, r: Reference) -> Result<FolderRecord<Reference>> {
        match r.kind() {
            Kind::Folder => FolderRecord::decode(&self.read_record(r.data(), FOLDER_SIZE)?),
            other => Err(expected("folder", other)),
        }
    }

    /// Locate the bytes of a small or full document. Micro documents have
    /// no span.
    pub fn document_span(&self, r: Reference) -> Result<DocumentSpan> {
        let (end, length) = match r.kind() {
            Kind::SmallDocument { length } => (r.data(), length as u64),
            Kind::Document => {
                let trailer = self.read_record(r.data(), DOCUMENT_LENGTH_SIZE)?;
                let mut len = [0u8; DOCUMENT_LENGTH_SIZE];
                len.copy_from_slice(&trailer);
                (
                    r.data() - DOCUMENT_LENGTH_SIZE as u64,
                    u64::from_be_bytes(len),
                )
            }
            other => return Err(expected("stored document", other)),
        };
        let start = end.checked_sub(length).ok_or_else(|| {
            Error::corruption(format!("document of {length} bytes cannot end at {end}"))
        })?;
        Ok(DocumentSpan { start, length })
    }

    /// Length in bytes of any document encoding.
    pub fn document_length(&self, r: Reference) -> Result<u64> {
        match r.kind() {
            Kind::MicroDocument { length } => Ok(length as u64),
            _ => Ok(self.document_span(r)?.length),
        }
    }
}

fn expected(what: &str, found: Kind) -> Error {
    Error::corruption(format!("expected {what}, found {found:?}"))
}
