//! Copy-on-write arena for an Update's modified nodes.
//!
//! Nodes are copied out of the file the first time an Update needs to change
//! them. A link either still points at a record on disk or at another node
//! in the arena. Commit writes the arena children-first, so every staged
//! link can be resolved to a file offset before its parent is encoded.

use k2v_core::reference::{map_type, run_type, FOLDER_TYPE, LEAF_TYPE, MAX_ADDRESS};
use k2v_core::{Error, Kind, Reference, Result};
use k2v_durability::{FolderRecord, LeafNode, MapNode, RunNode};

pub(crate) type NodeId = usize;

/// Pointer from a staged node to its child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    Stored(Reference),
    Staged(NodeId),
}

impl Link {
    pub(crate) const NULL: Link = Link::Stored(Reference::NULL);
}

#[derive(Debug, Clone)]
pub(crate) struct StagedFolder {
    pub(crate) record: FolderRecord<Link>,
    /// Enclosing staged folder, `None` for the root
    pub(crate) parent: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Map(MapNode<Link>),
    Run(RunNode<Link>),
    Leaf(LeafNode<Link>),
    Folder(StagedFolder),
}

impl Node {
    fn kind(&self) -> Kind {
        match self {
            Node::Map(map) => Kind::Map { arity: map.arity() },
            Node::Run(run) => Kind::Run {
                length: run.length(),
            },
            Node::Leaf(_) => Kind::Leaf,
            Node::Folder(_) => Kind::Folder,
        }
    }

    fn links(&self) -> Vec<Link> {
        match self {
            Node::Map(map) => map.children.clone(),
            Node::Run(run) => vec![run.branch],
            Node::Leaf(leaf) => vec![leaf.child, leaf.branch],
            Node::Folder(folder) => vec![folder.record.top],
        }
    }
}

/// Which link of a staged node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Field {
    FolderTop,
    RunBranch,
    LeafChild,
    LeafBranch,
    MapChild(usize),
}

/// A link inside the arena that an Update can overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub(crate) node: NodeId,
    pub(crate) field: Field,
}

impl Slot {
    pub(crate) fn new(node: NodeId, field: Field) -> Self {
        Slot { node, field }
    }
}

/// Result of encoding the arena.
#[derive(Debug)]
pub(crate) struct Encoded {
    /// Records in write order, root folder last
    pub(crate) bytes: Vec<u8>,
    /// The root folder with every link resolved
    pub(crate) root: FolderRecord<Reference>,
    pub(crate) records: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Staging {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl Staging {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub(crate) fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| Error::corruption(format!("staged node {id} does not exist")))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| Error::corruption(format!("staged node {id} does not exist")))
    }

    /// Kind of whatever `link` points at.
    pub(crate) fn kind(&self, link: Link) -> Result<Kind> {
        match link {
            Link::Stored(r) => Ok(r.kind()),
            Link::Staged(id) => Ok(self.node(id)?.kind()),
        }
    }

    pub(crate) fn get(&self, slot: Slot) -> Result<Link> {
        let node = self.node(slot.node)?;
        let link = match (node, slot.field) {
            (Node::Folder(folder), Field::FolderTop) => Some(&folder.record.top),
            (Node::Run(run), Field::RunBranch) => Some(&run.branch),
            (Node::Leaf(leaf), Field::LeafChild) => Some(&leaf.child),
            (Node::Leaf(leaf), Field::LeafBranch) => Some(&leaf.branch),
            (Node::Map(map), Field::MapChild(i)) => map.children.get(i),
            _ => None,
        };
        link.copied().ok_or_else(|| slot_mismatch(slot))
    }

    pub(crate) fn set(&mut self, slot: Slot, value: Link) -> Result<()> {
        let node = self.node_mut(slot.node)?;
        let link = match (node, slot.field) {
            (Node::Folder(folder), Field::FolderTop) => Some(&mut folder.record.top),
            (Node::Run(run), Field::RunBranch) => Some(&mut run.branch),
            (Node::Leaf(leaf), Field::LeafChild) => Some(&mut leaf.child),
            (Node::Leaf(leaf), Field::LeafBranch) => Some(&mut leaf.branch),
            (Node::Map(map), Field::MapChild(i)) => map.children.get_mut(i),
            _ => None,
        };
        *link.ok_or_else(|| slot_mismatch(slot))? = value;
        Ok(())
    }

    pub(crate) fn folder(&self, id: NodeId) -> Result<&StagedFolder> {
        match self.node(id)? {
            Node::Folder(folder) => Ok(folder),
            other => Err(node_mismatch("folder", other)),
        }
    }

    pub(crate) fn folder_mut(&mut self, id: NodeId) -> Result<&mut StagedFolder> {
        match self.node_mut(id)? {
            Node::Folder(folder) => Ok(folder),
            other => Err(node_mismatch("folder", other)),
        }
    }

    pub(crate) fn map_mut(&mut self, id: NodeId) -> Result<&mut MapNode<Link>> {
        match self.node_mut(id)? {
            Node::Map(map) => Ok(map),
            other => Err(node_mismatch("map", other)),
        }
    }

    pub(crate) fn run(&self, id: NodeId) -> Result<&RunNode<Link>> {
        match self.node(id)? {
            Node::Run(run) => Ok(run),
            other => Err(node_mismatch("run", other)),
        }
    }

    pub(crate) fn run_mut(&mut self, id: NodeId) -> Result<&mut RunNode<Link>> {
        match self.node_mut(id)? {
            Node::Run(run) => Ok(run),
            other => Err(node_mismatch("run", other)),
        }
    }

    /// Add `delta` to the byte count of `folder` and every folder above it.
    pub(crate) fn change_size(&mut self, folder: NodeId, delta: i64) -> Result<()> {
        let mut at = Some(folder);
        while let Some(id) = at {
            let staged = self.folder_mut(id)?;
            staged.record.bytes = staged
                .record
                .bytes
                .checked_add_signed(delta)
                .ok_or_else(|| Error::corruption("folder byte count went negative"))?;
            at = staged.parent;
        }
        Ok(())
    }

    /// Current record of a staged folder. Staged tops read as null since
    /// they have no file offset yet.
    pub(crate) fn snapshot(&self, id: NodeId) -> Result<FolderRecord<Reference>> {
        Ok(self.folder(id)?.record.map_links(|link| match *link {
            Link::Stored(r) => r,
            Link::Staged(_) => Reference::NULL,
        }))
    }

    /// Serialize every node reachable from `root`, children before parents,
    /// as if the first byte lands at file offset `base`.
    pub(crate) fn encode(&self, root: NodeId, base: u64) -> Result<Encoded> {
        let mut resolved: Vec<Option<Reference>> = vec![None; self.nodes.len()];
        let mut entered = vec![false; self.nodes.len()];
        let mut bytes = Vec::new();
        let mut records = 0;
        let mut stack = vec![(root, false)];

        while let Some((id, expanded)) = stack.pop() {
            if resolved.get(id).copied().flatten().is_some() {
                continue;
            }
            let node = self.node(id)?;
            if !expanded {
                if entered[id] {
                    return Err(Error::corruption(format!(
                        "staged node {id} is its own descendant"
                    )));
                }
                entered[id] = true;
                stack.push((id, true));
                for link in node.links().into_iter().rev() {
                    if let Link::Staged(child) = link {
                        stack.push((child, false));
                    }
                }
                continue;
            }

            let links = node
                .links()
                .into_iter()
                .map(|link| resolve_link(&resolved, link))
                .collect::<Result<Vec<_>>>()?;
            let mut links = links.into_iter();
            let mut resolve = |_: &Link| links.next().unwrap_or(Reference::NULL);
            let ty = match node {
                Node::Map(map) => {
                    map.map_links(&mut resolve).encode(&mut bytes);
                    map_type(map.arity())
                }
                Node::Run(run) => {
                    run.map_links(&mut resolve).encode(&mut bytes);
                    run_type(run.length())
                }
                Node::Leaf(leaf) => {
                    leaf.map_links(&mut resolve).encode(&mut bytes);
                    LEAF_TYPE
                }
                Node::Folder(folder) => {
                    folder.record.map_links(&mut resolve).encode(&mut bytes);
                    FOLDER_TYPE
                }
            };
            let end = base + bytes.len() as u64;
            if end > MAX_ADDRESS {
                return Err(Error::corruption(format!(
                    "store would grow past the largest addressable offset ({end:#x})"
                )));
            }
            resolved[id] = Some(Reference::new(ty, end));
            records += 1;
        }

        let record = &self.folder(root)?.record;
        let top = resolve_link(&resolved, record.top)?;
        let root_record = record.map_links(|_| top);
        Ok(Encoded {
            bytes,
            root: root_record,
            records,
        })
    }
}

/// File reference for `link`, which must already be encoded if staged.
fn resolve_link(resolved: &[Option<Reference>], link: Link) -> Result<Reference> {
    match link {
        Link::Stored(r) => Ok(r),
        Link::Staged(child) => resolved.get(child).copied().flatten().ok_or_else(|| {
            Error::corruption(format!("staged node {child} was not encoded before its parent"))
        }),
    }
}

fn slot_mismatch(slot: Slot) -> Error {
    Error::corruption(format!(
        "staged node {} has no {:?} link",
        slot.node, slot.field
    ))
}

fn node_mismatch(expected: &str, found: &Node) -> Error {
    Error::corruption(format!(
        "expected staged {expected}, found {:?}",
        found.kind()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k2v_durability::{FOLDER_SIZE, LEAF_SIZE};

    fn root_folder(staging: &mut Staging) -> NodeId {
        let id = staging.push(Node::Folder(StagedFolder {
            record: FolderRecord::empty(1, 0).map_links(|&r| Link::Stored(r)),
            parent: None,
        }));
        staging.set_root(id);
        id
    }

    #[test]
    fn test_slot_get_and_set() {
        let mut staging = Staging::new();
        let root = root_folder(&mut staging);
        let top = Slot::new(root, Field::FolderTop);

        assert_eq!(staging.get(top).unwrap(), Link::NULL);
        let doc = Link::Stored(Reference::micro(b"x"));
        staging.set(top, doc).unwrap();
        assert_eq!(staging.get(top).unwrap(), doc);

        let wrong = Slot::new(root, Field::RunBranch);
        assert!(staging.get(wrong).is_err());
        assert!(staging.set(wrong, Link::NULL).is_err());
    }

    #[test]
    fn test_change_size_walks_parents() {
        let mut staging = Staging::new();
        let root = root_folder(&mut staging);
        let child = staging.push(Node::Folder(StagedFolder {
            record: FolderRecord::empty(1, 0).map_links(|&r| Link::Stored(r)),
            parent: Some(root),
        }));

        staging.change_size(child, 10).unwrap();
        assert_eq!(staging.folder(child).unwrap().record.bytes, FOLDER_SIZE as u64 + 10);
        assert_eq!(staging.folder(root).unwrap().record.bytes, FOLDER_SIZE as u64 + 10);
        assert!(staging.change_size(root, -1000).is_err());
    }

    #[test]
    fn test_encode_writes_children_before_parents() {
        let mut staging = Staging::new();
        let root = root_folder(&mut staging);
        let leaf = staging.push(Node::Leaf(LeafNode {
            child: Link::Stored(Reference::micro(b"a")),
            branch: Link::NULL,
        }));
        staging.set(Slot::new(root, Field::FolderTop), Link::Staged(leaf)).unwrap();

        let encoded = staging.encode(root, 100).unwrap();
        assert_eq!(encoded.records, 2);
        assert_eq!(encoded.bytes.len(), LEAF_SIZE + FOLDER_SIZE);
        assert_eq!(
            encoded.root.top,
            Reference::new(LEAF_TYPE, 100 + LEAF_SIZE as u64)
        );
        // The folder record comes last and points at the leaf.
        let folder = FolderRecord::decode(&encoded.bytes[LEAF_SIZE..]).unwrap();
        assert_eq!(folder.top, encoded.root.top);
    }

    #[test]
    fn test_encode_rejects_unresolvable_links() {
        let mut staging = Staging::new();
        let root = root_folder(&mut staging);
        let leaf = staging.push(Node::Leaf(LeafNode {
            child: Link::NULL,
            branch: Link::NULL,
        }));
        staging.set(Slot::new(leaf, Field::LeafBranch), Link::Staged(leaf)).unwrap();
        staging.set(Slot::new(root, Field::FolderTop), Link::Staged(leaf)).unwrap();
        assert!(matches!(staging.encode(root, 100), Err(Error::Corruption(_))));

        let links = [None, Some(Reference::micro(b"a"))];
        assert!(resolve_link(&links, Link::Staged(0)).is_err());
        assert!(resolve_link(&links, Link::Staged(7)).is_err());
        assert_eq!(
            resolve_link(&links, Link::Staged(1)).unwrap(),
            Reference::micro(b"a")
        );
    }

    #[test]
    fn test_snapshot_hides_staged_top() {
        let mut staging = Staging::new();
        let root = root_folder(&mut staging);
        let leaf = staging.push(Node::Leaf(LeafNode {
            child: Link::NULL,
            branch: Link::NULL,
        }));
        staging.set(Slot::new(root, Field::FolderTop), Link::Staged(leaf)).unwrap();
        assert!(staging.snapshot(root).unwrap().top.is_null());
    }
}
