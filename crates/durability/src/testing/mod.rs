//! Testing utilities for the durability layer
//!
//! Tools for simulating crashes and storage faults against a store file:
//!
//! - **Truncation**: cut the file at an arbitrary offset (crash mid-write)
//! - **Garbage**: append bytes that are not a commit (torn write)
//! - **Bit rot**: flip bytes inside committed data
//!
//! # Example
//!
//! ```ignore
//! use k2v_durability::testing::StoreCorruptionTester;
//!
//! let tester = StoreCorruptionTester::new("path/to/store");
//! tester.truncate_tail(50)?;
//! // Reopening should recover the previous commit
//! ```

mod corruption;

pub use corruption::{
    flip_byte, truncate_file, CorruptionResult, GarbageResult, StoreCorruptionTester,
    TruncationResult,
};
