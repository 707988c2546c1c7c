//! k2v - an append-only, versioned key/value store in a single file
//!
//! Keys are byte strings organized into nested folders; values are opaque
//! byte documents. Every commit appends a new version of the trie to the
//! file, so readers keep a consistent snapshot for as long as they hold a
//! [`Query`], and a crash at any point leaves the store at its last
//! complete commit.
//!
//! # Quick Start
//!
//! ```no_run
//! use k2v::{Store, Value};
//!
//! # fn main() -> k2v::Result<()> {
//! let store = Store::create("data.k2v")?;
//!
//! let mut update = store.update()?;
//! let root = update.root();
//! update.put(&root, b"greeting", b"hello")?;
//! update.commit()?;
//!
//! let query = store.query()?;
//! if let Value::Document(doc) = query.find(&query.root(), b"greeting")? {
//!     assert_eq!(query.read_to_vec(&doc)?, b"hello");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The facade re-exports `k2v-engine`. The file format and recovery scan
//! live in `k2v-durability`, the reference codec and error types in
//! `k2v-core`.

pub use k2v_engine::*;
