//! Updates: the single writer of a store.
//!
//! An Update appends document bytes to the file as they are written and
//! keeps every trie node it changes in memory. Commit appends the changed
//! nodes (children first, root folder last) and a footer, then publishes
//! the new root to later Queries.
//!
//! Any failed operation leaves the Update corrupted: every later operation
//! fails with [`Error::TransactionCorrupted`] until it is closed, and
//! closing discards whatever it wrote.

mod descend;
mod patch;
mod staging;
mod tail;
mod writer;

pub use writer::DocumentWriter;

use crate::folder::{Brand, Folder};
use crate::store::{now_millis, Store, StoreShared, Version};
use k2v_core::{Error, Reference, Result};
use k2v_durability::{CommitFooter, CommitMode, FileHeader, FolderRecord, DOUBLE_SYNC_MARKER};
use rustc_hash::FxHashMap;
use staging::{Link, Staging};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tail::Tail;
use tracing::{debug, warn};

/// A transaction that changes the store.
///
/// Only one Update runs at a time; [`Store::update`] blocks until the
/// previous one has committed or closed. Dropping an Update without
/// committing it closes it.
pub struct Update {
    shared: Arc<StoreShared>,
    prior: Version,
    version: u64,
    brand: Brand,
    tail: Option<Tail>,
    staging: Staging,
    /// Total on-disk size of full documents written by this Update
    written: FxHashMap<Reference, u64>,
    checksumming: bool,
    corrupted: bool,
    closed: bool,
}

impl Update {
    pub(crate) fn begin(shared: Arc<StoreShared>) -> Result<Self> {
        if shared.readers.is_closed() {
            return Err(Error::Closed("store"));
        }
        shared.gate.acquire();
        let (prior, tail) = match Self::prepare(&shared) {
            Ok(parts) => parts,
            Err(e) => {
                shared.gate.release();
                return Err(e);
            }
        };
        let version = (prior.root.version + 1).max(now_millis());
        let brand = shared.next_transaction();
        debug!(
            target: "k2v::update",
            version,
            prior_version = prior.root.version,
            "Update started"
        );
        Ok(Update {
            shared,
            prior,
            version,
            brand,
            tail: Some(tail),
            staging: Staging::new(),
            written: FxHashMap::default(),
            checksumming: true,
            corrupted: false,
            closed: false,
        })
    }

    /// Pick up the writer state left by the previous Update, cutting off
    /// anything it left behind uncommitted.
    fn prepare(shared: &StoreShared) -> Result<(Version, Tail)> {
        let mut state = shared.writer.lock();
        if shared.readers.is_closed() {
            return Err(Error::Closed("store"));
        }
        let prior = state.pending.clone();
        if state.dirty {
            state.tail = None;
            let file = OpenOptions::new().write(true).open(&shared.path)?;
            let found = file.metadata()?.len();
            file.set_len(prior.file_length)?;
            file.sync_all()?;
            if found != prior.file_length {
                warn!(
                    target: "k2v::update",
                    path = %shared.path.display(),
                    committed = prior.file_length,
                    discarded = found.saturating_sub(prior.file_length),
                    "Discarded bytes after the last commit"
                );
            }
        } else {
            state.dirty = true;
        }
        let file = match state.tail.take() {
            Some(file) => file,
            None => OpenOptions::new().append(true).open(&shared.path)?,
        };
        let buffer = std::mem::take(&mut state.buffer);
        let tail = Tail::new(
            file,
            buffer,
            shared.config.write_buffer_size,
            prior.file_length,
        );
        Ok((prior, tail))
    }

    /// Root folder as of the version this Update builds on.
    pub fn root(&self) -> Folder {
        Folder::root(self.brand, self.prior.root.clone())
    }

    /// Version number this Update will commit as.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// True once an operation has failed.
    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    /// True once committed or closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Start writing a document at `key` in `folder`, replacing whatever
    /// is there. The value is installed by [`DocumentWriter::finish`].
    pub fn open(&mut self, folder: &Folder, key: &[u8]) -> Result<DocumentWriter<'_>> {
        self.check()?;
        self.corrupted = true;
        let start = self.tail()?.address();
        Ok(DocumentWriter::new(self, folder.clone(), key.to_vec(), start))
    }

    /// Store `bytes` at `key` in `folder`.
    pub fn put(&mut self, folder: &Folder, key: &[u8], bytes: &[u8]) -> Result<()> {
        let mut writer = self.open(folder, key)?;
        writer.write_all(bytes)?;
        writer.finish()
    }

    /// Replace whatever is at `key` in `folder` with a null.
    pub fn remove(&mut self, folder: &Folder, key: &[u8]) -> Result<()> {
        self.guarded(|update| update.install(folder, key, 0, Reference::NULL))
    }

    /// Make sure `folder` exists and mark it as changed by this Update.
    ///
    /// Missing folders on the path are created.
    pub fn touch(&mut self, folder: &Folder) -> Result<Folder> {
        self.guarded(|update| {
            let id = update.stage_folder(folder)?;
            Ok(folder.reissue(update.brand, update.staging.snapshot(id)?))
        })
    }

    /// Open (creating if needed) the folder at `key` in `folder`.
    ///
    /// Replacing a document with a folder makes the new folder absolute.
    pub fn nest(&mut self, folder: &Folder, key: &[u8]) -> Result<Folder> {
        self.guarded(|update| {
            let record = FolderRecord::empty(update.version, 0);
            let child = Folder::nested(folder, key, update.brand, record);
            let id = update.stage_folder(&child)?;
            Ok(child.reissue(update.brand, update.staging.snapshot(id)?))
        })
    }

    /// Write a new, empty store at `path` that continues this store's
    /// version numbering, and hand it this Update's write buffer.
    pub fn spawn(&mut self, path: impl AsRef<Path>) -> Result<Store> {
        let path = path.as_ref();
        self.guarded(|update| {
            let first_version = update
                .shared
                .last_version()
                .saturating_add(1)
                .max(now_millis());
            let buffer = update.tail()?.take_buffer()?;
            let header = FileHeader::new(first_version, update.shared.header.separator);
            let spawned =
                Store::create_from_header(path, update.shared.config.clone(), header)?;
            spawned.adopt_buffer(buffer);
            Ok(spawned)
        })
    }

    /// Make this Update's changes durable and visible to new Queries.
    pub fn commit(&mut self) -> Result<()> {
        self.check()?;
        self.corrupted = true;
        let Some(root) = self.staging.root() else {
            self.end(true);
            return Ok(());
        };

        let base = self.tail()?.address();
        let encoded = self.staging.encode(root, base)?;
        let double_sync =
            !self.checksumming || self.shared.config.commit_mode == CommitMode::DoubleSync;
        let unsealed =
            CommitFooter::unsealed_bytes(self.prior.file_length, &self.shared.header.separator);

        let tail = self.tail()?;
        tail.write(&encoded.bytes)?;
        if double_sync {
            tail.write(&unsealed[..8])?;
            tail.sync()?;
            tail.write(&unsealed[8..])?;
            tail.write(&DOUBLE_SYNC_MARKER.to_be_bytes())?;
        } else {
            tail.write(&unsealed)?;
            let crc = tail.checksum();
            tail.write(&crc.to_be_bytes())?;
        }
        tail.flush()?;
        let sync = tail.try_clone_file()?;
        let next = Version {
            file_length: tail.address(),
            root: encoded.root,
        };

        self.shared.writer.lock().pending = next.clone();
        self.end(true);
        sync.sync_data()?;

        debug!(
            target: "k2v::update",
            version = next.root.version,
            file_length = next.file_length,
            records = encoded.records,
            double_sync,
            "Committed"
        );
        self.shared.publish(next);
        Ok(())
    }

    /// Abandon the Update. Bytes it wrote are cut off by the next Update.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let clean = !self.corrupted && self.staging.is_empty();
        if !clean {
            debug!(target: "k2v::update", version = self.version, "Update abandoned");
        }
        self.end(clean);
    }

    /// Hand the file and buffer back to the store and admit the next
    /// Update. `clean` means nothing after the prior commit needs cutting.
    fn end(&mut self, clean: bool) {
        if self.closed {
            return;
        }
        self.closed = true;
        {
            let mut state = self.shared.writer.lock();
            if let Some(tail) = self.tail.take() {
                let (file, buffer) = tail.into_parts();
                state.tail = Some(file);
                state.buffer = buffer;
            }
            if clean {
                state.dirty = false;
            }
        }
        self.shared.gate.release();
    }

    fn check(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed("update"));
        }
        if self.corrupted {
            return Err(Error::TransactionCorrupted);
        }
        Ok(())
    }

    /// Run `op`, leaving the Update corrupted if it fails.
    fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.check()?;
        self.corrupted = true;
        let result = op(self)?;
        self.corrupted = false;
        Ok(result)
    }

    fn tail(&mut self) -> Result<&mut Tail> {
        self.tail.as_mut().ok_or(Error::Closed("update"))
    }

    /// Put `reference` at `key` in `folder`. `size` is the number of bytes
    /// the value occupies in the file.
    fn install(
        &mut self,
        folder: &Folder,
        key: &[u8],
        size: u64,
        reference: Reference,
    ) -> Result<()> {
        let folder_id = self.stage_folder(folder)?;
        let slot = self.descend(folder_id, key)?;
        self.replace(folder_id, slot, size, Link::Stored(reference))
    }
}

impl Drop for Update {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Update {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Update")
            .field("version", &self.version)
            .field("prior_version", &self.prior.root.version)
            .field("staged", &self.staging.len())
            .field("corrupted", &self.corrupted)
            .field("closed", &self.closed)
            .finish()
    }
}
