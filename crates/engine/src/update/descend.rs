//! Path resolution and trie surgery for Updates.
//!
//! Every change goes the same way: stage the folder (and the folders above
//! it), walk the folder's trie for the key while copying each node into
//! the arena and reshaping it so that a slot for the key exists, then
//! overwrite that slot. Every reshape keeps the folder byte counts exact.

use super::staging::{Field, Link, Node, NodeId, Slot, StagedFolder};
use super::Update;
use crate::folder::Folder;
use k2v_core::reference::RUN_MAX_LENGTH;
use k2v_core::{Error, Kind, Result};
use k2v_durability::{
    document_size, map_size, FolderRecord, LeafNode, MapNode, RunNode, FOLDER_ABSOLUTE,
    FOLDER_SIZE, LEAF_SIZE,
};

impl Update {
    /// Stage `folder` by walking its path from the root, creating any
    /// folder that is missing, and stamp it with this Update's version.
    pub(super) fn stage_folder(&mut self, folder: &Folder) -> Result<NodeId> {
        let id = match folder.parent() {
            None => self.stage_root(),
            Some(parent) => {
                let parent_id = self.stage_folder(parent)?;
                let slot = self.descend(parent_id, folder.key())?;
                match self.staging.kind(self.staging.get(slot)?)? {
                    Kind::Folder => self.stage(slot, parent_id)?,
                    existing => {
                        let flags = if existing == Kind::Null {
                            self.staging.folder(parent_id)?.record.flags
                        } else {
                            FOLDER_ABSOLUTE
                        };
                        let record = FolderRecord {
                            count: 0,
                            bytes: FOLDER_SIZE as u64,
                            top: Link::NULL,
                            version: self.version,
                            flags,
                        };
                        let id = self.staging.push(Node::Folder(StagedFolder {
                            record,
                            parent: Some(parent_id),
                        }));
                        self.replace(parent_id, slot, FOLDER_SIZE as u64, Link::Staged(id))?;
                        id
                    }
                }
            }
        };
        self.staging.folder_mut(id)?.record.version = self.version;
        Ok(id)
    }

    fn stage_root(&mut self) -> NodeId {
        if let Some(id) = self.staging.root() {
            return id;
        }
        let record = self.prior.root.map_links(|&r| Link::Stored(r));
        let id = self.staging.push(Node::Folder(StagedFolder {
            record,
            parent: None,
        }));
        self.staging.set_root(id);
        id
    }

    /// Copy the node in `slot` into the arena (once) and point the slot at
    /// the copy. `folder` is the staged folder the slot belongs to.
    pub(super) fn stage(&mut self, slot: Slot, folder: NodeId) -> Result<NodeId> {
        let r = match self.staging.get(slot)? {
            Link::Staged(id) => return Ok(id),
            Link::Stored(r) => r,
        };
        let file = &self.shared.file;
        let stored = |child: &k2v_core::Reference| Link::Stored(*child);
        let node = match r.kind() {
            Kind::Map { .. } => Node::Map(file.read_map(r)?.map_links(stored)),
            Kind::Run { .. } => Node::Run(file.read_run(r)?.map_links(stored)),
            Kind::Leaf => Node::Leaf(file.read_leaf(r)?.map_links(stored)),
            Kind::Folder => Node::Folder(StagedFolder {
                record: file.read_folder(r)?.map_links(stored),
                parent: Some(folder),
            }),
            other => {
                return Err(Error::corruption(format!(
                    "cannot stage a {other:?} as a trie node"
                )))
            }
        };
        let id = self.staging.push(node);
        self.staging.set(slot, Link::Staged(id))?;
        Ok(id)
    }

    /// Walk `folder`'s trie along `key`, reshaping it until a slot holding
    /// exactly the value at `key` exists, and return that slot.
    pub(super) fn descend(&mut self, folder: NodeId, key: &[u8]) -> Result<Slot> {
        let mut slot = Slot::new(folder, Field::FolderTop);
        let mut depth = 0;
        let mut size: i64 = 0;

        loop {
            let link = self.staging.get(slot)?;
            let kind = self.staging.kind(link)?;

            if depth == key.len() {
                match kind {
                    Kind::Map { .. } | Kind::Run { .. } => {
                        let leaf = self.staging.push(Node::Leaf(LeafNode {
                            child: Link::NULL,
                            branch: link,
                        }));
                        self.staging.set(slot, Link::Staged(leaf))?;
                        size += LEAF_SIZE as i64;
                        slot = Slot::new(leaf, Field::LeafChild);
                    }
                    Kind::Leaf => {
                        let leaf = self.stage(slot, folder)?;
                        slot = Slot::new(leaf, Field::LeafChild);
                    }
                    _ => {}
                }
                break;
            }

            match kind {
                Kind::Map { arity } => {
                    let map_id = self.stage(slot, folder)?;
                    let head = key[depth];
                    let map = self.staging.map_mut(map_id)?;
                    let index = match map.find(head) {
                        Ok(index) => index,
                        Err(index) => {
                            map.insert(index, head, Link::NULL);
                            size += (map_size(arity + 1) - map_size(arity)) as i64;
                            index
                        }
                    };
                    slot = Slot::new(map_id, Field::MapChild(index));
                    depth += 1;
                }
                Kind::Run { length } => {
                    let run_id = self.stage(slot, folder)?;
                    let matched = {
                        let run = self.staging.run(run_id)?;
                        run.bytes
                            .iter()
                            .zip(&key[depth..])
                            .take_while(|(a, b)| a == b)
                            .count()
                    };
                    if matched == length {
                        slot = Slot::new(run_id, Field::RunBranch);
                        depth += length;
                        continue;
                    }

                    // Split the run at the first mismatch (or where the key
                    // ends). A prefix run keeps the matched bytes.
                    if matched > 0 {
                        let prefix_bytes = self.staging.run(run_id)?.bytes[..matched].to_vec();
                        let prefix = self.staging.push(Node::Run(RunNode {
                            bytes: prefix_bytes,
                            branch: Link::Staged(run_id),
                        }));
                        self.staging.set(slot, Link::Staged(prefix))?;
                        size += (matched + 8) as i64;
                        slot = Slot::new(prefix, Field::RunBranch);
                        depth += matched;
                    }

                    if depth == key.len() {
                        self.staging.run_mut(run_id)?.bytes.drain(..matched);
                        size -= matched as i64;
                        let leaf = self.staging.push(Node::Leaf(LeafNode {
                            child: Link::NULL,
                            branch: Link::Staged(run_id),
                        }));
                        self.staging.set(slot, Link::Staged(leaf))?;
                        size += LEAF_SIZE as i64;
                        slot = Slot::new(leaf, Field::LeafChild);
                        break;
                    }

                    let run = self.staging.run_mut(run_id)?;
                    let split = run.bytes[matched];
                    let rest = if matched + 1 == length {
                        size -= (length + 8) as i64;
                        run.branch
                    } else {
                        run.bytes.drain(..=matched);
                        size -= (matched + 1) as i64;
                        Link::Staged(run_id)
                    };
                    let head = key[depth];
                    let map = MapNode::pair((split, rest), (head, Link::NULL));
                    let index = match map.find(head) {
                        Ok(index) => index,
                        Err(_) => return Err(Error::corruption("split map lost its new head")),
                    };
                    let map_id = self.staging.push(Node::Map(map));
                    self.staging.set(slot, Link::Staged(map_id))?;
                    size += map_size(2) as i64;
                    slot = Slot::new(map_id, Field::MapChild(index));
                    depth += 1;
                }
                Kind::Leaf => {
                    let leaf = self.stage(slot, folder)?;
                    slot = Slot::new(leaf, Field::LeafBranch);
                }
                Kind::Null => {
                    let length = (key.len() - depth).min(RUN_MAX_LENGTH);
                    let run = self.staging.push(Node::Run(RunNode {
                        bytes: key[depth..depth + length].to_vec(),
                        branch: Link::NULL,
                    }));
                    self.staging.set(slot, Link::Staged(run))?;
                    size += (length + 8) as i64;
                    slot = Slot::new(run, Field::RunBranch);
                    depth += length;
                }
                _ => {
                    // A value where the key continues: keep it as the child
                    // of a leaf and carry on down the leaf's branch.
                    let leaf = self.staging.push(Node::Leaf(LeafNode {
                        child: link,
                        branch: Link::NULL,
                    }));
                    self.staging.set(slot, Link::Staged(leaf))?;
                    size += LEAF_SIZE as i64;
                    slot = Slot::new(leaf, Field::LeafBranch);
                }
            }
        }

        if size != 0 {
            self.staging.change_size(folder, size)?;
        }
        Ok(slot)
    }

    /// Overwrite `slot` in `folder` with `value`, which occupies `size`
    /// bytes, and settle the folder's count and byte totals.
    pub(super) fn replace(
        &mut self,
        folder: NodeId,
        slot: Slot,
        size: u64,
        value: Link,
    ) -> Result<()> {
        let old = self.staging.get(slot)?;
        let old_kind = self.staging.kind(old)?;
        let garbage = match (old_kind, old) {
            (Kind::Null, _) | (Kind::MicroDocument { .. }, _) => 0,
            (Kind::SmallDocument { length }, _) => length as u64,
            (Kind::Folder, Link::Staged(id)) => self.staging.folder(id)?.record.bytes,
            (Kind::Folder, Link::Stored(r)) => self.shared.file.read_folder(r)?.bytes,
            (Kind::Document, Link::Stored(r)) => match self.written.get(&r) {
                Some(&written) => written,
                None => document_size(self.shared.file.document_length(r)?),
            },
            (other, _) => {
                return Err(Error::corruption(format!(
                    "expected a value in the slot being replaced, found {other:?}"
                )))
            }
        };
        let new_is_null = self.staging.kind(value)? == Kind::Null;

        self.staging.set(slot, value)?;
        let record = &mut self.staging.folder_mut(folder)?.record;
        match (old_kind == Kind::Null, new_is_null) {
            (true, false) => record.count += 1,
            (false, true) => record.count = record.count.saturating_sub(1),
            _ => {}
        }
        if size != garbage {
            self.staging
                .change_size(folder, size as i64 - garbage as i64)?;
        }
        Ok(())
    }
}
