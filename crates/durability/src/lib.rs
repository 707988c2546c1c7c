//! Durability layer for k2v
//!
//! This crate handles everything that touches disk:
//!
//! - Binary on-disk formats (file header, commit footer, trie node records)
//! - Positional record reads against a shared file handle
//! - Checkpoint recovery: backward scan for the newest valid commit footer
//! - Store configuration (commit sealing mode, buffer sizes)
//! - Crash testing helpers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config; // StoreConfig, CommitMode
pub mod file; // Positional reads and typed record loading
pub mod format; // Header, commit footer, node records
pub mod recovery; // Checkpoint scan and commit history
pub mod testing; // Corruption helpers for crash tests

pub use config::{CommitMode, StoreConfig};
pub use file::{DocumentSpan, RecordFile};
pub use format::{
    document_size, map_size, run_size, version_size, CommitFooter, FileHeader, FolderRecord,
    LeafNode, MapNode, RunNode, Seal, Separator, DOUBLE_SYNC_MARKER, FOLDER_ABSOLUTE,
    FOLDER_SIZE, FOOTER_SIZE, HEADER_SIZE, LEAF_SIZE, MAGIC, MIN_STORE_SIZE, SEPARATOR_SIZE,
};
pub use recovery::{commit_history, recover, Checkpoint, CommitRecord};
