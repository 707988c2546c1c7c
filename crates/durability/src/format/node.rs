//! Trie node records.
//!
//! Nodes are generic over the child link type so the write path can hold
//! staged nodes whose children are not yet on disk. Only
//! `Node<Reference>` is ever encoded or decoded.
//!
//! # Map
//!
//! ```text
//! arity <= 32:  heads (arity bytes, ascending) | children (arity x 8)
//! arity >  32:  bitmap (32 bytes)              | children (arity x 8)
//! ```
//!
//! Bitmap bit for head `b` is `0x80 >> (b % 8)` in byte `b / 8`.
//!
//! # Run
//!
//! ```text
//! literal bytes (length) | branch (8)
//! ```
//!
//! # Leaf
//!
//! ```text
//! child (8) | branch (8)
//! ```
//!
//! # Folder
//!
//! ```text
//! count (8) | bytes (8) | top (8) | version (8) | flags (1)
//! ```

use byteorder::{BigEndian, ByteOrder};
use k2v_core::reference::{MAP_MAX_ARITY, MICRO_DOCUMENT_MAX, RUN_MAX_LENGTH, SMALL_DOCUMENT_MAX};
use k2v_core::{Error, Reference, Result};

/// Size of a reference on disk.
pub const REFERENCE_SIZE: usize = 8;

/// Size of a Leaf record.
pub const LEAF_SIZE: usize = 2 * REFERENCE_SIZE;

/// Size of a Folder record.
pub const FOLDER_SIZE: usize = 8 + 8 + REFERENCE_SIZE + 8 + 1;

/// Size of the length trailer on a full document.
pub const DOCUMENT_LENGTH_SIZE: usize = 8;

/// Size of a Map head bitmap.
pub const BITMAP_SIZE: usize = MAP_MAX_ARITY / 8;

/// Size of the largest Map record.
pub const MAP_MAX_SIZE: usize = BITMAP_SIZE + MAP_MAX_ARITY * REFERENCE_SIZE;

/// Folder flag: this folder hides whatever earlier versions held at its path.
pub const FOLDER_ABSOLUTE: u8 = 0x01;

/// Bytes occupied by a Map of `arity` children.
pub fn map_size(arity: usize) -> usize {
    arity.min(BITMAP_SIZE) + arity * REFERENCE_SIZE
}

/// Bytes occupied by a Run of `length` literal bytes.
pub fn run_size(length: usize) -> usize {
    length + REFERENCE_SIZE
}

/// Bytes occupied on disk by a document of `length` bytes.
pub fn document_size(length: u64) -> u64 {
    if length <= MICRO_DOCUMENT_MAX as u64 {
        0
    } else if length <= SMALL_DOCUMENT_MAX as u64 {
        length
    } else {
        length + DOCUMENT_LENGTH_SIZE as u64
    }
}

fn check_len(what: &str, bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() != expected {
        return Err(Error::corruption(format!(
            "{what} record needs {expected} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

fn read_reference(bytes: &[u8]) -> Reference {
    Reference::from_bits(BigEndian::read_u64(bytes))
}

/// Branch on the next key byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapNode<R> {
    /// Distinct head bytes, ascending
    pub heads: Vec<u8>,
    /// One child per head
    pub children: Vec<R>,
}

impl<R> MapNode<R> {
    /// Build a two-way branch. `a` and `b` may come in either order.
    pub fn pair(a: (u8, R), b: (u8, R)) -> Self {
        debug_assert_ne!(a.0, b.0);
        let (first, second) = if a.0 < b.0 { (a, b) } else { (b, a) };
        MapNode {
            heads: vec![first.0, second.0],
            children: vec![first.1, second.1],
        }
    }

    /// Number of children.
    pub fn arity(&self) -> usize {
        self.heads.len()
    }

    /// Index of `head`, or where it would be inserted.
    pub fn find(&self, head: u8) -> std::result::Result<usize, usize> {
        self.heads.binary_search(&head)
    }

    /// Insert a child at the position returned by a failed [`find`](Self::find).
    pub fn insert(&mut self, index: usize, head: u8, child: R) {
        self.heads.insert(index, head);
        self.children.insert(index, child);
    }

    /// Convert every child link.
    pub fn map_links<S>(&self, mut f: impl FnMut(&R) -> S) -> MapNode<S> {
        MapNode {
            heads: self.heads.clone(),
            children: self.children.iter().map(&mut f).collect(),
        }
    }
}

impl MapNode<Reference> {
    /// Decode a Map of `arity` children from its exact record bytes.
    pub fn decode(arity: usize, bytes: &[u8]) -> Result<Self> {
        check_len("map", bytes, map_size(arity))?;
        let head_bytes = arity.min(BITMAP_SIZE);
        let heads: Vec<u8> = if arity <= BITMAP_SIZE {
            bytes[..head_bytes].to_vec()
        } else {
            (0..MAP_MAX_ARITY)
                .filter(|b| bytes[b / 8] & (0x80 >> (b % 8)) != 0)
                .map(|b| b as u8)
                .collect()
        };
        if heads.len() != arity || heads.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::corruption(format!(
                "map heads inconsistent with arity {arity}"
            )));
        }
        let children = bytes[head_bytes..]
            .chunks_exact(REFERENCE_SIZE)
            .map(read_reference)
            .collect();
        Ok(MapNode { heads, children })
    }

    /// Encode into record bytes.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let arity = self.arity();
        if arity <= BITMAP_SIZE {
            out.extend_from_slice(&self.heads);
        } else {
            let mut bitmap = [0u8; BITMAP_SIZE];
            for &b in &self.heads {
                bitmap[b as usize / 8] |= 0x80 >> (b % 8);
            }
            out.extend_from_slice(&bitmap);
        }
        for child in &self.children {
            out.extend_from_slice(&child.to_bits().to_be_bytes());
        }
    }
}

/// Literal key segment followed by a single branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunNode<R> {
    /// Literal bytes, 1..=256 long
    pub bytes: Vec<u8>,
    /// What follows the literal
    pub branch: R,
}

impl<R> RunNode<R> {
    /// Literal length.
    pub fn length(&self) -> usize {
        self.bytes.len()
    }

    /// Convert the branch link.
    pub fn map_links<S>(&self, f: impl FnOnce(&R) -> S) -> RunNode<S> {
        RunNode {
            bytes: self.bytes.clone(),
            branch: f(&self.branch),
        }
    }
}

impl RunNode<Reference> {
    /// Decode a Run of `length` bytes from its exact record bytes.
    pub fn decode(length: usize, bytes: &[u8]) -> Result<Self> {
        if length == 0 || length > RUN_MAX_LENGTH {
            return Err(Error::corruption(format!("run length {length} out of range")));
        }
        check_len("run", bytes, run_size(length))?;
        Ok(RunNode {
            bytes: bytes[..length].to_vec(),
            branch: read_reference(&bytes[length..]),
        })
    }

    /// Encode into record bytes.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.bytes);
        out.extend_from_slice(&self.branch.to_bits().to_be_bytes());
    }
}

/// Value at the current key plus the branch for longer keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode<R> {
    /// Value at this key
    pub child: R,
    /// Keys extending this one
    pub branch: R,
}

impl<R> LeafNode<R> {
    /// Convert both links.
    pub fn map_links<S>(&self, mut f: impl FnMut(&R) -> S) -> LeafNode<S> {
        LeafNode {
            child: f(&self.child),
            branch: f(&self.branch),
        }
    }
}

impl LeafNode<Reference> {
    /// Decode from exact record bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        check_len("leaf", bytes, LEAF_SIZE)?;
        Ok(LeafNode {
            child: read_reference(&bytes[..REFERENCE_SIZE]),
            branch: read_reference(&bytes[REFERENCE_SIZE..]),
        })
    }

    /// Encode into record bytes.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.child.to_bits().to_be_bytes());
        out.extend_from_slice(&self.branch.to_bits().to_be_bytes());
    }
}

/// Namespace record carrying its own size accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRecord<R> {
    /// Non-null values directly in this folder
    pub count: u64,
    /// Bytes reachable from this folder, this record included
    pub bytes: u64,
    /// Root of the folder's trie
    pub top: R,
    /// Version of the last change to this folder
    pub version: u64,
    /// Flag bits, see [`FOLDER_ABSOLUTE`]
    pub flags: u8,
}

impl<R> FolderRecord<R> {
    /// True if this folder hides earlier versions of its path.
    pub fn is_absolute(&self) -> bool {
        self.flags & FOLDER_ABSOLUTE != 0
    }

    /// Convert the top link.
    pub fn map_links<S>(&self, f: impl FnOnce(&R) -> S) -> FolderRecord<S> {
        FolderRecord {
            count: self.count,
            bytes: self.bytes,
            top: f(&self.top),
            version: self.version,
            flags: self.flags,
        }
    }
}

impl FolderRecord<Reference> {
    /// A folder with nothing in it.
    pub fn empty(version: u64, flags: u8) -> Self {
        FolderRecord {
            count: 0,
            bytes: FOLDER_SIZE as u64,
            top: Reference::NULL,
            version,
            flags,
        }
    }

    /// Decode from exact record bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        check_len("folder", bytes, FOLDER_SIZE)?;
        Ok(FolderRecord {
            count: BigEndian::read_u64(&bytes[0..8]),
            bytes: BigEndian::read_u64(&bytes[8..16]),
            top: read_reference(&bytes[16..24]),
            version: BigEndian::read_u64(&bytes[24..32]),
            flags: bytes[32],
        })
    }

    /// Encode into record bytes.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.count.to_be_bytes());
        out.extend_from_slice(&self.bytes.to_be_bytes());
        out.extend_from_slice(&self.top.to_bits().to_be_bytes());
        out.extend_from_slice(&self.version.to_be_bytes());
        out.push(self.flags);
    }
}
