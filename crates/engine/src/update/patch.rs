//! Copying a folder tree from a Query into an Update.

use super::Update;
use crate::folder::Folder;
use crate::query::Query;
use crate::value::{Document, Value};
use k2v_core::{Kind, Reference, Result};
use k2v_durability::{document_size, FolderRecord};

/// Chunk size for copying document bytes between files.
const COPY_CHUNK_SIZE: usize = 64 * 1024;

impl Update {
    /// Overlay everything under `base` in `query` onto the same path in
    /// this Update.
    ///
    /// Values in `query` replace values here, nulls included. Absolute
    /// folders in `query` replace whatever this store has at their path;
    /// other folders are merged key by key. A patched Update is always
    /// sealed by double sync, since copied document bytes are not
    /// checksummed.
    pub fn patch(&mut self, query: &Query, base: &Folder) -> Result<()> {
        self.guarded(|update| {
            update.checksumming = false;
            update.stage_folder(base)?;
            update.patch_folder(base, query, base)
        })
    }

    fn patch_folder(&mut self, to: &Folder, query: &Query, from: &Folder) -> Result<()> {
        for entry in query.list(from)? {
            let (key, value) = entry?;
            match value {
                Value::Folder(child) => {
                    if child.is_absolute() {
                        self.install(to, &key, 0, Reference::EMPTY_DOCUMENT)?;
                    }
                    let record = FolderRecord::empty(self.version, 0);
                    let nested = Folder::nested(to, &key, self.brand, record);
                    self.stage_folder(&nested)?;
                    self.patch_folder(&nested, query, &child)?;
                }
                Value::Null(_) => self.install(to, &key, 0, Reference::NULL)?,
                Value::Document(doc) if doc.is_inline() => {
                    self.install(to, &key, 0, doc.reference())?
                }
                Value::Document(doc) => {
                    let (size, reference) = self.copy_document(query, &doc)?;
                    self.install(to, &key, size, reference)?;
                }
            }
        }

        let id = self.stage_folder(to)?;
        let record = &mut self.staging.folder_mut(id)?.record;
        record.version = record.version.max(from.version());
        Ok(())
    }

    /// Append the stored bytes of `doc` (length trailer included) to the
    /// tail and return the size and reference of the copy.
    fn copy_document(&mut self, query: &Query, doc: &Document) -> Result<(u64, Reference)> {
        let reference = doc.reference();
        let span = doc.span();
        let size = match reference.kind() {
            Kind::Document => document_size(span.length),
            _ => span.length,
        };

        let tail = self.tail()?;
        let mut chunk = vec![0u8; COPY_CHUNK_SIZE.min(size as usize)];
        let mut at = span.start;
        let end = span.start + size;
        while at < end {
            let n = chunk.len().min((end - at) as usize);
            query.file().read_at(&mut chunk[..n], at)?;
            tail.write_unchecked(&chunk[..n])?;
            at += n as u64;
        }

        let copied = reference.with_data(tail.address());
        if reference.kind() == Kind::Document {
            self.written.insert(copied, size);
        }
        Ok((size, copied))
    }
}
