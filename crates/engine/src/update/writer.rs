//! Streaming document writes.

use super::Update;
use crate::folder::Folder;
use k2v_core::reference::{
    small_document_type, DOCUMENT_TYPE, MICRO_DOCUMENT_MAX, SMALL_DOCUMENT_MAX,
};
use k2v_core::{Reference, Result};
use std::io::{self, Write};

/// Writes one document into an [`Update`].
///
/// Bytes go straight to the end of the store file, except for documents of
/// six bytes or less, which end up packed into their reference. Nothing is
/// visible in the Update until [`finish`](Self::finish) is called; dropping
/// the writer instead leaves the Update corrupted.
pub struct DocumentWriter<'u> {
    update: &'u mut Update,
    folder: Folder,
    key: Vec<u8>,
    start: u64,
    inline: [u8; MICRO_DOCUMENT_MAX],
    inline_len: usize,
    spilled: bool,
}

impl<'u> DocumentWriter<'u> {
    pub(super) fn new(update: &'u mut Update, folder: Folder, key: Vec<u8>, start: u64) -> Self {
        DocumentWriter {
            update,
            folder,
            key,
            start,
            inline: [0; MICRO_DOCUMENT_MAX],
            inline_len: 0,
            spilled: false,
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        if self.spilled {
            self.update.tail.as_ref().map_or(0, |tail| tail.address() - self.start)
        } else {
            self.inline_len as u64
        }
    }

    /// True if nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Install the document at its key.
    pub fn finish(self) -> Result<()> {
        let DocumentWriter {
            update,
            folder,
            key,
            start,
            inline,
            inline_len,
            spilled,
        } = self;

        let (size, reference) = if spilled {
            let tail = update.tail()?;
            let length = tail.address() - start;
            if length <= SMALL_DOCUMENT_MAX as u64 {
                let ty = small_document_type(length as usize);
                (length, Reference::new(ty, tail.address()))
            } else {
                tail.write(&length.to_be_bytes())?;
                let reference = Reference::new(DOCUMENT_TYPE, tail.address());
                update.written.insert(reference, length + 8);
                (length + 8, reference)
            }
        } else {
            (0, Reference::micro(&inline[..inline_len]))
        };

        update.install(&folder, &key, size, reference)?;
        update.corrupted = false;
        Ok(())
    }
}

impl Write for DocumentWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.spilled {
            if self.inline_len + buf.len() <= MICRO_DOCUMENT_MAX {
                self.inline[self.inline_len..self.inline_len + buf.len()].copy_from_slice(buf);
                self.inline_len += buf.len();
                return Ok(buf.len());
            }
            self.spilled = true;
            let held = self.inline;
            self.update.tail()?.write(&held[..self.inline_len])?;
        }
        self.update.tail()?.write(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
