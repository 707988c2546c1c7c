//! Core types for k2v
//!
//! This crate defines the foundational pieces shared by every other crate:
//! - Error: the error taxonomy (format, I/O, corruption, misuse)
//! - Reference: 64-bit tagged record pointers and their type-code arithmetic

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod reference;

pub use error::{ConfigError, Error, Result};
pub use reference::{Kind, Reference, TypeCode};
