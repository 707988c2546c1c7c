//! Compaction: copy one version into a fresh file.
//!
//! The tree is copied bottom-up with an explicit stack, so deep tries do not
//! recurse. Every record is written after all of its children, which is the
//! order the file format requires.

use crate::query::Query;
use k2v_core::reference::{map_type, run_type, FOLDER_TYPE, LEAF_TYPE};
use k2v_core::{Error, Kind, Reference, Result};
use k2v_durability::{
    document_size, CommitFooter, FileHeader, FolderRecord, LeafNode, MapNode, RecordFile,
    RunNode, DOUBLE_SYNC_MARKER,
};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// A structural node whose children are still being copied.
enum Pending {
    Map(MapNode<Reference>),
    Run(RunNode<Reference>),
    Leaf(LeafNode<Reference>),
    Folder(FolderRecord<Reference>),
}

impl Pending {
    fn children(&self) -> Vec<Reference> {
        match self {
            Pending::Map(map) => map.children.clone(),
            Pending::Run(run) => vec![run.branch],
            Pending::Leaf(leaf) => vec![leaf.child, leaf.branch],
            Pending::Folder(folder) => vec![folder.top],
        }
    }
}

struct Frame {
    node: Pending,
    children: Vec<Reference>,
    copied: Vec<Reference>,
}

enum Step {
    Done(Reference),
    Descend(Frame),
}

struct Compactor<'a> {
    source: &'a RecordFile,
    out: BufWriter<File>,
    address: u64,
}

impl Compactor<'_> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        self.address += bytes.len() as u64;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_data()?;
        Ok(())
    }

    /// Copy the tree rooted at `root` and return its new reference.
    fn copy_tree(&mut self, root: Reference) -> Result<Reference> {
        let mut stack = match self.enter(root)? {
            Step::Done(r) => return Ok(r),
            Step::Descend(frame) => vec![frame],
        };
        while let Some(mut frame) = stack.pop() {
            if frame.copied.len() == frame.children.len() {
                let copied = self.emit(frame)?;
                match stack.last_mut() {
                    Some(parent) => parent.copied.push(copied),
                    None => return Ok(copied),
                }
                continue;
            }
            let next = frame.children[frame.copied.len()];
            match self.enter(next)? {
                Step::Done(r) => {
                    frame.copied.push(r);
                    stack.push(frame);
                }
                Step::Descend(child) => {
                    stack.push(frame);
                    stack.push(child);
                }
            }
        }
        Err(Error::corruption("compaction stack emptied before the root"))
    }

    fn enter(&mut self, r: Reference) -> Result<Step> {
        let node = match r.kind() {
            Kind::Null | Kind::MicroDocument { .. } => return Ok(Step::Done(r)),
            Kind::SmallDocument { .. } | Kind::Document => {
                return Ok(Step::Done(self.copy_document(r)?))
            }
            Kind::Map { .. } => Pending::Map(self.source.read_map(r)?),
            Kind::Run { .. } => Pending::Run(self.source.read_run(r)?),
            Kind::Leaf => Pending::Leaf(self.source.read_leaf(r)?),
            Kind::Folder => Pending::Folder(self.source.read_folder(r)?),
        };
        let children = node.children();
        Ok(Step::Descend(Frame {
            node,
            copied: Vec::with_capacity(children.len()),
            children,
        }))
    }

    fn emit(&mut self, frame: Frame) -> Result<Reference> {
        let mut copied = frame.copied.into_iter();
        let mut next = |_: &Reference| copied.next().unwrap_or(Reference::NULL);
        let mut bytes = Vec::new();
        let ty = match frame.node {
            Pending::Map(map) => {
                map.map_links(&mut next).encode(&mut bytes);
                map_type(map.arity())
            }
            Pending::Run(run) => {
                run.map_links(&mut next).encode(&mut bytes);
                run_type(run.length())
            }
            Pending::Leaf(leaf) => {
                leaf.map_links(&mut next).encode(&mut bytes);
                LEAF_TYPE
            }
            Pending::Folder(folder) => {
                folder.map_links(&mut next).encode(&mut bytes);
                FOLDER_TYPE
            }
        };
        self.write(&bytes)?;
        Ok(Reference::new(ty, self.address))
    }

    fn copy_document(&mut self, r: Reference) -> Result<Reference> {
        let span = self.source.document_span(r)?;
        let size = match r.kind() {
            Kind::Document => document_size(span.length),
            _ => span.length,
        };
        let mut chunk = vec![0u8; COPY_CHUNK_SIZE.min(size as usize)];
        let mut at = span.start;
        let end = span.start + size;
        while at < end {
            let n = chunk.len().min((end - at) as usize);
            self.source.read_at(&mut chunk[..n], at)?;
            self.write(&chunk[..n])?;
            at += n as u64;
        }
        Ok(r.with_data(self.address))
    }
}

/// Write the version `query` sees to a new file at `path`, sealed by
/// double sync with no prior commit. Returns the new file's length.
pub(crate) fn compact_into(query: &Query, path: &Path, header: &FileHeader) -> Result<u64> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => Error::AlreadyExists(path.to_path_buf()),
            _ => Error::IoError(e),
        })?;
    let mut compactor = Compactor {
        source: query.file(),
        out: BufWriter::with_capacity(COPY_CHUNK_SIZE, file),
        address: 0,
    };

    compactor.write(&header.to_bytes())?;
    compactor.copy_tree(query.root_reference())?;
    let unsealed = CommitFooter::unsealed_bytes(0, &header.separator);
    compactor.write(&unsealed[..8])?;
    compactor.sync()?;
    compactor.write(&unsealed[8..])?;
    compactor.write(&DOUBLE_SYNC_MARKER.to_be_bytes())?;
    compactor.sync()?;
    Ok(compactor.address)
}

#[cfg(test)]
mod tests {
    use crate::{Error, Store, Value};
    use tempfile::tempdir;

    #[test]
    fn test_compacted_store_keeps_latest_values() {
        let dir = tempdir().unwrap();
        let store = Store::create(dir.path().join("store.k2v")).unwrap();
        for round in 0..5u8 {
            let mut update = store.update().unwrap();
            let root = update.root();
            let folder = update.nest(&root, b"nested").unwrap();
            update.put(&root, b"counter", &[round; 100]).unwrap();
            update.put(&folder, b"big", &vec![round; 70_000]).unwrap();
            update.commit().unwrap();
        }
        assert!(store.load_factor() < 0.5);

        let compacted = store.compact(dir.path().join("compacted.k2v")).unwrap();
        assert_eq!(compacted.load_factor(), 1.0);
        assert_eq!(compacted.last_version(), store.last_version());

        let query = compacted.query().unwrap();
        let root = query.root();
        let counter = query.find(&root, b"counter").unwrap();
        assert_eq!(
            query.read_to_vec(counter.as_document().unwrap()).unwrap(),
            vec![4u8; 100]
        );
        let Value::Folder(folder) = query.find(&root, b"nested").unwrap() else {
            panic!("expected a folder");
        };
        let big = query.find(&folder, b"big").unwrap();
        assert_eq!(
            query.read_to_vec(big.as_document().unwrap()).unwrap(),
            vec![4u8; 70_000]
        );
        assert_eq!(compacted.commit_history().unwrap().len(), 1);
    }

    #[test]
    fn test_compact_refuses_existing_target() {
        let dir = tempdir().unwrap();
        let store = Store::create(dir.path().join("store.k2v")).unwrap();
        let target = dir.path().join("taken");
        std::fs::write(&target, b"x").unwrap();
        assert!(matches!(store.compact(&target), Err(Error::AlreadyExists(_))));
    }
}
