//! Trie store engine for k2v
//!
//! This crate ties the file format to a transactional API:
//! - Store: open/create/close, merge, compaction
//! - Query: snapshot reads, ordered listing, document streaming
//! - Update: the single writer; staged trie edits, commit, patch, spawn
//!
//! ```no_run
//! use k2v_engine::Store;
//!
//! # fn main() -> k2v_engine::Result<()> {
//! let store = Store::create("data.k2v")?;
//!
//! let mut update = store.update()?;
//! let root = update.root();
//! let users = update.nest(&root, b"users")?;
//! update.put(&users, b"alice", b"{\"admin\":true}")?;
//! update.commit()?;
//!
//! let query = store.query()?;
//! for entry in query.list(&users)? {
//!     let (key, value) = entry?;
//!     if let Some(doc) = value.as_document() {
//!         println!("{:?} => {} bytes", key, doc.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod compact;
mod document;
mod folder;
mod gate;
mod listing;
mod query;
mod store;
mod update;
mod value;

pub use document::DocumentReader;
pub use folder::Folder;
pub use listing::Listing;
pub use query::Query;
pub use store::Store;
pub use update::{DocumentWriter, Update};
pub use value::{Absence, Document, Value};

pub use k2v_core::{Error, Result};
pub use k2v_durability::{CommitMode, CommitRecord, Seal, StoreConfig};
