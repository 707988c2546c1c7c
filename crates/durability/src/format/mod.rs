//! On-disk byte formats.
//!
//! This module centralizes all serialization logic for the store file.
//! Keeping serialization separate from operational logic (how queries and
//! updates walk the trie) makes format evolution easier to manage.
//!
//! # File Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Header: magic (8) | first version (8) | separator (16)   │
//! ├──────────────────────────────────────────────────────────┤
//! │ records of commit 1 ... root Folder                      │
//! │ Footer: prior length (8) | separator (16) | seal (4)     │
//! ├──────────────────────────────────────────────────────────┤
//! │ records of commit 2 ... root Folder                      │
//! │ Footer                                                   │
//! ├──────────────────────────────────────────────────────────┤
//! │ ...                                                      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. Records are located by references holding
//! the offset of their *end*, so every record is read backward.
//!
//! # Module Structure
//!
//! - `header`: file header
//! - `commit`: commit footer and seal
//! - `node`: Map, Run, Leaf, Folder records and document sizing

pub mod commit;
pub mod header;
pub mod node;

pub use commit::{CommitFooter, Seal, DOUBLE_SYNC_MARKER, FOOTER_SIZE};
pub use header::{FileHeader, Separator, HEADER_SIZE, MAGIC, SEPARATOR_SIZE};
pub use node::{
    document_size, map_size, run_size, FolderRecord, LeafNode, MapNode, RunNode,
    BITMAP_SIZE, DOCUMENT_LENGTH_SIZE, FOLDER_ABSOLUTE, FOLDER_SIZE, LEAF_SIZE, MAP_MAX_SIZE,
};

/// Smallest file holding a valid version: header, one empty root Folder,
/// one commit footer.
pub const MIN_STORE_SIZE: u64 = (HEADER_SIZE + FOLDER_SIZE + FOOTER_SIZE) as u64;

/// Bytes a version with a root of `root_bytes` occupies once compacted.
pub fn version_size(root_bytes: u64) -> u64 {
    HEADER_SIZE as u64 + root_bytes + FOOTER_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_store_size() {
        assert_eq!(MIN_STORE_SIZE, 93);
        assert_eq!(version_size(FOLDER_SIZE as u64), MIN_STORE_SIZE);
    }
}
