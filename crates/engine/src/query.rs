//! Read-only views of one committed version.

use crate::document::DocumentReader;
use crate::folder::{Brand, Folder};
use crate::listing::Listing;
use crate::store::{StoreShared, Version};
use crate::value::{Absence, Document, Value};
use k2v_core::{Error, Kind, Reference, Result};
use k2v_durability::RecordFile;
use std::io::Read;
use std::sync::Arc;

/// Most that `read_to_vec` reserves before the first read; larger
/// documents grow the buffer as they are read.
const READ_RESERVE_LIMIT: u64 = 64 * 1024;

/// A consistent view of the store as of the commit that was newest when
/// the Query opened. Later commits are invisible to it.
///
/// Dropping a Query closes it.
pub struct Query {
    shared: Arc<StoreShared>,
    version: Version,
    brand: Brand,
    closed: bool,
}

impl Query {
    pub(crate) fn open(shared: Arc<StoreShared>) -> Result<Self> {
        if !shared.readers.enter() {
            return Err(Error::Closed("store"));
        }
        let version = shared.committed.read().clone();
        let brand = shared.committed_brand();
        Ok(Query {
            shared,
            version,
            brand,
            closed: false,
        })
    }

    /// The root folder of this version.
    pub fn root(&self) -> Folder {
        Folder::root(self.brand, self.version.root.clone())
    }

    /// Version number of the commit this Query sees.
    pub fn version(&self) -> u64 {
        self.version.root.version
    }

    /// File length at the end of the commit this Query sees.
    pub fn file_length(&self) -> u64 {
        self.version.file_length
    }

    /// Look up `key` in `folder`.
    ///
    /// `folder` may come from any Query or Update, on this store or
    /// another; it is re-resolved by path when this Query cannot vouch for
    /// it. A missing folder yields a null.
    pub fn find(&self, folder: &Folder, key: &[u8]) -> Result<Value> {
        self.check()?;
        match self.own(folder)? {
            Value::Folder(owned) => self.lookup(&owned, key),
            other => Ok(other),
        }
    }

    /// Iterate over the values in `folder` in ascending key order.
    pub fn list(&self, folder: &Folder) -> Result<Listing<'_>> {
        self.check()?;
        match self.own(folder)? {
            Value::Folder(owned) => Ok(Listing::new(self, owned)),
            _ => Ok(Listing::empty(self)),
        }
    }

    /// Stream the bytes of `document`.
    pub fn read(&self, document: &Document) -> Result<DocumentReader<'_>> {
        self.check()?;
        if document.is_inline() {
            return Ok(DocumentReader::inline(document));
        }
        if document.store() != self.shared.id {
            return Err(Error::Foreign("document"));
        }
        Ok(DocumentReader::stored(&self.shared.file, document))
    }

    /// Read all of `document` into memory.
    pub fn read_to_vec(&self, document: &Document) -> Result<Vec<u8>> {
        let mut reader = self.read(document)?;
        let mut bytes = Vec::with_capacity(document.len().min(READ_RESERVE_LIMIT) as usize);
        reader.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Release the Query. Later calls fail with [`Error::Closed`].
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.readers.exit();
        }
    }

    /// True once the Query has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed("query"));
        }
        Ok(())
    }

    pub(crate) fn file(&self) -> &RecordFile {
        &self.shared.file
    }

    pub(crate) fn root_reference(&self) -> Reference {
        self.version.root_reference()
    }

    /// Turn `folder` into a handle whose record this Query can trust.
    pub(crate) fn own(&self, folder: &Folder) -> Result<Value> {
        if folder.brand() == self.brand && folder.version() <= self.version() {
            return Ok(Value::Folder(folder.clone()));
        }
        match folder.parent() {
            None => Ok(Value::Folder(self.root())),
            Some(parent) => match self.find(parent, folder.key())? {
                Value::Document(_) => Ok(Value::Null(Absence::Definite)),
                other => Ok(other),
            },
        }
    }

    /// Walk `folder`'s trie for `key`.
    fn lookup(&self, folder: &Folder, key: &[u8]) -> Result<Value> {
        let file = self.file();
        let mut node = folder.top();
        if node.is_null() {
            return Ok(Value::Null(folder_absence(folder)));
        }
        let mut depth = 0;
        loop {
            match node.kind() {
                Kind::Map { .. } => {
                    let Some(&head) = key.get(depth) else { break };
                    let map = file.read_map(node)?;
                    match map.find(head) {
                        Ok(index) => {
                            node = map.children[index];
                            depth += 1;
                        }
                        Err(_) => break,
                    }
                }
                Kind::Run { length } => {
                    let run = file.read_run(node)?;
                    if key.len() - depth < length || key[depth..depth + length] != run.bytes[..] {
                        break;
                    }
                    node = run.branch;
                    depth += length;
                }
                Kind::Leaf => {
                    let leaf = file.read_leaf(node)?;
                    node = if depth == key.len() {
                        leaf.child
                    } else {
                        leaf.branch
                    };
                }
                Kind::Null if depth == key.len() => return Ok(Value::Null(Absence::Definite)),
                Kind::Null => break,
                _ if depth == key.len() => return self.entry(folder, key, node),
                _ => break,
            }
        }
        Ok(Value::Null(folder_absence(folder)))
    }

    /// Build the value for the terminal reference `r` found at `key`.
    pub(crate) fn entry(&self, folder: &Folder, key: &[u8], r: Reference) -> Result<Value> {
        match r.kind() {
            Kind::Null => Ok(Value::Null(Absence::Definite)),
            Kind::MicroDocument { .. } => Ok(Value::Document(Document::micro(r, self.shared.id))),
            Kind::SmallDocument { .. } | Kind::Document => Ok(Value::Document(Document::stored(
                r,
                self.file().document_span(r)?,
                self.shared.id,
            ))),
            Kind::Folder => {
                let record = self.file().read_folder(r)?;
                Ok(Value::Folder(Folder::nested(folder, key, self.brand, record)))
            }
            other => Err(Error::corruption(format!(
                "expected a value at a trie terminal, found {other:?}"
            ))),
        }
    }
}

/// Absence of a key that `folder` has no entry for.
fn folder_absence(folder: &Folder) -> Absence {
    if folder.is_absolute() {
        Absence::Definite
    } else {
        Absence::Indefinite
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("version", &self.version())
            .field("file_length", &self.version.file_length)
            .field("closed", &self.closed)
            .finish()
    }
}
