//! Store handle and open/create/close logic
//!
//! A [`Store`] owns one append-only file. Opening a store runs recovery,
//! which finds the newest complete commit by scanning backward from the end
//! of the file. Anything after that commit is left in place and cut off
//! by the next [`Update`].
//!
//! ## Concurrency
//!
//! - Any number of [`Query`]s may run at once. Each sees the version that
//!   was committed when it opened.
//! - One [`Update`] runs at a time. Updates queue in arrival order.
//! - A commit releases the writer gate before its final sync, so the next
//!   Update can start writing while the previous one is still syncing.

use crate::compact;
use crate::folder::Brand;
use crate::gate::{ReaderCount, WriterGate};
use crate::query::Query;
use crate::update::Update;
use k2v_core::reference::FOLDER_TYPE;
use k2v_core::{Error, Reference, Result};
use k2v_durability::{
    commit_history, recover, version_size, CommitFooter, CommitRecord, FileHeader, FolderRecord,
    RecordFile, StoreConfig, FOOTER_SIZE, SEPARATOR_SIZE,
};
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A committed (or about to be committed) version of the store.
#[derive(Debug, Clone)]
pub(crate) struct Version {
    /// File length at the end of the commit footer
    pub(crate) file_length: u64,
    /// Root folder of the version
    pub(crate) root: FolderRecord<Reference>,
}

impl Version {
    pub(crate) fn root_reference(&self) -> Reference {
        Reference::new(FOLDER_TYPE, self.file_length - FOOTER_SIZE as u64)
    }
}

/// Writer-side state, handed from one Update to the next.
#[derive(Debug)]
pub(crate) struct WriterState {
    /// Append handle kept open between Updates
    pub(crate) tail: Option<File>,
    /// Write buffer, recycled between Updates
    pub(crate) buffer: Vec<u8>,
    /// Bytes past `pending.file_length` may exist on disk
    pub(crate) dirty: bool,
    /// Newest commit, possibly not yet synced
    pub(crate) pending: Version,
}

pub(crate) struct StoreShared {
    pub(crate) id: u64,
    pub(crate) path: PathBuf,
    pub(crate) config: StoreConfig,
    pub(crate) header: FileHeader,
    pub(crate) file: RecordFile,
    pub(crate) committed: RwLock<Version>,
    pub(crate) readers: ReaderCount,
    pub(crate) gate: WriterGate,
    pub(crate) writer: Mutex<WriterState>,
    transactions: AtomicU64,
    _lock: File,
}

impl StoreShared {
    /// Brand carried by handles that point at committed records.
    pub(crate) fn committed_brand(&self) -> Brand {
        Brand::committed(self.id)
    }

    /// Brand for a new Update.
    pub(crate) fn next_transaction(&self) -> Brand {
        Brand {
            store: self.id,
            transaction: self.transactions.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }

    pub(crate) fn last_version(&self) -> u64 {
        self.committed.read().root.version
    }

    /// Make `next` visible to new Queries. Commits may finish syncing out
    /// of order, so an older version never replaces a newer one.
    pub(crate) fn publish(&self, next: Version) {
        let mut committed = self.committed.write();
        if next.file_length > committed.file_length {
            *committed = next;
        }
    }
}

/// An open store file.
///
/// Cloning a `Store` is cheap; every clone shares the same file handles.
#[derive(Clone)]
pub struct Store {
    shared: Arc<StoreShared>,
}

impl Store {
    /// Create a new, empty store at `path` with the default configuration.
    ///
    /// Fails with [`Error::AlreadyExists`] if the file already exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with(path, StoreConfig::default(), &mut rand::thread_rng())
    }

    /// Create a new, empty store drawing its commit separator from `rng`.
    pub fn create_with(
        path: impl AsRef<Path>,
        config: StoreConfig,
        rng: &mut impl RngCore,
    ) -> Result<Self> {
        let mut separator = [0u8; SEPARATOR_SIZE];
        rng.fill_bytes(&mut separator);
        Self::create_from_header(path.as_ref(), config, FileHeader::new(now_millis(), separator))
    }

    pub(crate) fn create_from_header(
        path: &Path,
        config: StoreConfig,
        header: FileHeader,
    ) -> Result<Self> {
        config.validate()?;
        initialize(path, &header)?;
        info!(
            target: "k2v::store",
            path = %path.display(),
            first_version = header.first_version,
            "Created store"
        );
        Self::open_with_config(path, config)
    }

    /// Open an existing store with the default configuration.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Open an existing store.
    ///
    /// Recovery picks the newest commit whose footer verifies. Bytes after
    /// it are reported and discarded by the next Update.
    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();

        let file = RecordFile::open(&path).map_err(|e| match e {
            Error::IoError(io) if io.kind() == io::ErrorKind::NotFound => {
                Error::format(format!("no store at {}", path.display()))
            }
            other => other,
        })?;

        // Exclusive lock, held until the last handle is dropped.
        let lock = OpenOptions::new().read(true).open(&path)?;
        fs2::FileExt::try_lock_exclusive(&lock).map_err(|_| Error::InUse(path.clone()))?;

        let checkpoint = recover(&file, config.scan_window)?;
        if checkpoint.is_dirty() {
            warn!(
                target: "k2v::store",
                path = %path.display(),
                trailing_bytes = checkpoint.trailing_bytes(),
                "Store has bytes after its last commit; they will be discarded by the next update"
            );
        }
        debug!(
            target: "k2v::store",
            path = %path.display(),
            file_length = checkpoint.file_length,
            version = checkpoint.root.version,
            "Opened store"
        );

        let dirty = checkpoint.is_dirty();
        let version = Version {
            file_length: checkpoint.file_length,
            root: checkpoint.root.clone(),
        };
        let shared = StoreShared {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            path,
            config,
            header: checkpoint.header,
            file,
            committed: RwLock::new(version.clone()),
            readers: ReaderCount::new(),
            gate: WriterGate::new(),
            writer: Mutex::new(WriterState {
                tail: None,
                buffer: Vec::new(),
                dirty,
                pending: version,
            }),
            transactions: AtomicU64::new(0),
            _lock: lock,
        };
        Ok(Store {
            shared: Arc::new(shared),
        })
    }

    /// Start a read-only view of the latest committed version.
    pub fn query(&self) -> Result<Query> {
        Query::open(Arc::clone(&self.shared))
    }

    /// Start an update. Blocks until earlier Updates have finished.
    pub fn update(&self) -> Result<Update> {
        Update::begin(Arc::clone(&self.shared))
    }

    /// Copy everything in `other`'s latest version into this store as one
    /// commit. Values in `other` win; keys only this store has are kept.
    pub fn merge(&self, other: &Store) -> Result<()> {
        let query = other.query()?;
        let root = query.root();
        let mut update = self.update()?;
        update.patch(&query, &root)?;
        update.commit()?;
        info!(
            target: "k2v::merge",
            from = %other.path().display(),
            into = %self.path().display(),
            version = self.last_version(),
            "Merged store"
        );
        Ok(())
    }

    /// Write the latest version, and nothing else, to a new file at `path`
    /// and open it.
    pub fn compact(&self, path: impl AsRef<Path>) -> Result<Store> {
        let path = path.as_ref();
        let query = self.query()?;
        let file_length = compact::compact_into(&query, path, &self.shared.header)?;
        info!(
            target: "k2v::compaction",
            from = %self.path().display(),
            to = %path.display(),
            before = self.file_length(),
            after = file_length,
            "Compacted store"
        );
        drop(query);
        Store::open_with_config(path, self.shared.config.clone())
    }

    /// Refuse new Queries and Updates, wait for open Queries to close and
    /// the running Update to finish, then sync the file.
    ///
    /// Must not be called from a thread that still holds a Query or Update
    /// on this store.
    pub fn close(&self) -> Result<()> {
        if !self.shared.readers.close_and_drain() {
            return Ok(());
        }
        self.shared.gate.acquire();
        let result = self.sync_tail();
        self.shared.gate.release();
        debug!(target: "k2v::store", path = %self.path().display(), "Closed store");
        result
    }

    fn sync_tail(&self) -> Result<()> {
        let mut state = self.shared.writer.lock();
        if let Some(tail) = state.tail.take() {
            tail.sync_all()?;
        }
        state.buffer = Vec::new();
        Ok(())
    }

    /// Seed the write buffer, so the first Update does not allocate one.
    pub(crate) fn adopt_buffer(&self, buffer: Vec<u8>) {
        self.shared.writer.lock().buffer = buffer;
    }

    /// True once [`Store::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.readers.is_closed()
    }

    /// Share of the file taken up by the latest version. A freshly
    /// compacted store has a load factor of 1.
    pub fn load_factor(&self) -> f64 {
        let committed = self.shared.committed.read();
        version_size(committed.root.bytes) as f64 / committed.file_length as f64
    }

    /// Version number of the latest commit.
    pub fn last_version(&self) -> u64 {
        self.shared.last_version()
    }

    /// Version number the store file started at.
    pub fn first_version(&self) -> u64 {
        self.shared.header.first_version
    }

    /// File length at the end of the latest commit.
    pub fn file_length(&self) -> u64 {
        self.shared.committed.read().file_length
    }

    /// Path of the store file.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Configuration the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// Commits reachable from the latest one by following prior lengths,
    /// newest first.
    pub fn commit_history(&self) -> Result<Vec<CommitRecord>> {
        commit_history(
            &self.shared.file,
            &self.shared.header.separator,
            self.file_length(),
        )
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.shared.path)
            .field("file_length", &self.file_length())
            .field("last_version", &self.last_version())
            .finish()
    }
}

/// Write a header and an empty, checksummed first commit to a new file.
fn initialize(path: &Path, header: &FileHeader) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => Error::AlreadyExists(path.to_path_buf()),
            _ => Error::IoError(e),
        })?;

    let mut bytes = header.to_bytes().to_vec();
    FolderRecord::empty(header.first_version, 0).encode(&mut bytes);
    bytes.extend_from_slice(&CommitFooter::unsealed_bytes(0, &header.separator));
    let crc = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&crc.to_be_bytes());

    file.write_all(&bytes)?;
    file.sync_all()?;
    Ok(())
}
